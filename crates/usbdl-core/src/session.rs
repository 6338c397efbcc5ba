//! Download session - high-level orchestrator for one payload upload.

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::collect::ResponseCollector;
use crate::device::DeviceSession;
use crate::events::{DownloadEvent, DownloadObserver, DownloadPhase, TracingObserver};
use crate::protocol::DownloadPacket;
use crate::protocol::constants::{
    DOWNLOAD_INTERFACE, EXYNOS_PRODUCT_ID, EXYNOS_VENDOR_ID, RESPONSE_READ_TIMEOUT, SETTLE_DELAY,
};
use crate::target::Target;
use crate::transmit::ChunkedTransmitter;
use crate::transport::{NusbTransport, TransportError, UsbTransport};

/// Configuration for a download session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Payload to send.
    pub input_path: Option<String>,
    /// Where to store data the device streams back. No draining when unset.
    pub output_path: Option<String>,
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    /// Ask the OS to detach a kernel driver bound to the interface.
    pub detach_kernel_driver: bool,
    /// Wait between the end of transmission and interface release.
    pub settle_delay_secs: u64,
    /// Per-read timeout while draining the response.
    pub response_timeout_ms: u64,
    /// Default log level for front-ends (`error` .. `trace`).
    pub log_level: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_path: None,
            output_path: None,
            vendor_id: EXYNOS_VENDOR_ID,
            product_id: EXYNOS_PRODUCT_ID,
            interface: DOWNLOAD_INTERFACE,
            detach_kernel_driver: true,
            settle_delay_secs: SETTLE_DELAY.as_secs(),
            response_timeout_ms: RESPONSE_READ_TIMEOUT.as_millis() as u64,
            log_level: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Can't read config {}", path.display()))?;
        let config: SessionConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Summary of a finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub payload_len: usize,
    pub packet_len: usize,
    pub write_calls: usize,
    pub target: Option<Target>,
    /// Bytes stored in the output file, if one was requested.
    pub collected_bytes: Option<u64>,
}

/// Download session - frames the input, sends it and tears the device down.
pub struct UsbdlSession<O: DownloadObserver> {
    config: SessionConfig,
    observer: Arc<O>,
}

impl UsbdlSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: DownloadObserver + 'static> UsbdlSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run against a real device.
    pub fn run(&self) -> Result<RunReport> {
        self.run_with(NusbTransport::open_with_ids)
    }

    /// Run with a caller-supplied way of opening the device.
    #[instrument(skip_all)]
    pub fn run_with<T, F>(&self, open: F) -> Result<RunReport>
    where
        T: UsbTransport,
        F: FnOnce(u16, u16) -> Result<T, TransportError>,
    {
        let config = &self.config;
        self.phase(DownloadPhase::Preparing);

        let input = config
            .input_path
            .as_deref()
            .ok_or_else(|| anyhow!("No input file given"))?;
        let payload =
            std::fs::read(input).with_context(|| format!("Can't open input file {input}"))?;
        let packet = DownloadPacket::build(&payload)?;

        self.phase(DownloadPhase::Connecting);
        let transport = open(config.vendor_id, config.product_id).with_context(|| {
            format!(
                "Cannot open device {:04x}:{:04x}",
                config.vendor_id, config.product_id
            )
        })?;

        // From here on the device is closed on every return path.
        let mut device = DeviceSession::new(transport);
        self.observer.on_event(&DownloadEvent::DeviceOpened {
            vid: device.transport().vendor_id(),
            pid: device.transport().product_id(),
        });

        device
            .claim_interface(config.interface, config.detach_kernel_driver)
            .context("Error claiming interface")?;

        let target = device.identify();
        match target {
            Some(target) => self
                .observer
                .on_event(&DownloadEvent::TargetIdentified { target }),
            None => self.observer.on_event(&DownloadEvent::TargetUnknown {
                product: device.product_string(),
            }),
        }

        self.phase(DownloadPhase::Transmitting);
        info!("Sending file {} (0x{:x})...", input, payload.len());
        let sent = ChunkedTransmitter::new(self.observer.as_ref()).send(&device, &packet);

        if sent.is_ok() {
            info!("File {} sent !", input);
        }

        let collected = match (&sent, config.output_path.as_deref()) {
            (Ok(_), Some(output)) => self.collect_response(&device, output).map(Some),
            _ => Ok(None),
        };

        // The device gets its settle time whether or not the upload went through.
        if config.settle_delay_secs > 0 {
            self.phase(DownloadPhase::Settling);
            thread::sleep(Duration::from_secs(config.settle_delay_secs));
        }

        device.release_interface();
        device.close();

        let transmit = sent?;
        let collected_bytes = collected?;

        self.phase(DownloadPhase::Complete);
        self.observer.on_event(&DownloadEvent::Complete);

        Ok(RunReport {
            payload_len: payload.len(),
            packet_len: packet.len(),
            write_calls: transmit.write_calls,
            target,
            collected_bytes,
        })
    }

    fn collect_response<T: UsbTransport>(
        &self,
        device: &DeviceSession<T>,
        output: &str,
    ) -> Result<u64> {
        self.phase(DownloadPhase::Collecting);
        let file =
            File::create(output).with_context(|| format!("Can't open output file {output}"))?;
        let mut sink = BufWriter::new(file);
        let report = ResponseCollector::new(self.observer.as_ref())
            .with_timeout(Duration::from_millis(self.config.response_timeout_ms))
            .collect(device, &mut sink)
            .with_context(|| format!("Can't write output file {output}"))?;
        info!(bytes = report.bytes_written, "Response saved to {}", output);
        Ok(report.bytes_written)
    }

    fn phase(&self, phase: DownloadPhase) {
        self.observer
            .on_event(&DownloadEvent::PhaseChanged { phase });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingObserver;
    use crate::transport::MockTransport;
    use crate::transport::mock::CallCounts;
    use std::cell::Cell;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("usbdl-{}-{}", std::process::id(), name))
    }

    fn config_for(input: &PathBuf) -> SessionConfig {
        SessionConfig {
            input_path: Some(input.to_string_lossy().into_owned()),
            settle_delay_secs: 0,
            ..Default::default()
        }
    }

    fn session(config: SessionConfig) -> (UsbdlSession<RecordingObserver>, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        (
            UsbdlSession::with_observer(config, observer.clone()),
            observer,
        )
    }

    #[test]
    fn test_end_to_end_1000_bytes() {
        let input = temp_path("e2e.bin");
        std::fs::write(&input, vec![0xCC; 1000]).unwrap();
        let mock = MockTransport::new()
            .with_product("Exynos8890")
            .with_max_write(512);

        let (session, observer) = session(config_for(&input));
        let report = session
            .run_with(|vid, pid| {
                assert_eq!((vid, pid), (0x18D1, 0x4F00));
                Ok(mock.clone())
            })
            .unwrap();

        assert_eq!(report.payload_len, 1000);
        assert_eq!(report.packet_len, 1010);
        assert_eq!(report.write_calls, 2);
        assert_eq!(report.target, Some(Target::Exynos8890));
        assert_eq!(report.collected_bytes, None);

        let sizes: Vec<usize> = mock.get_writes().iter().map(|w| w.requested).collect();
        assert_eq!(sizes, vec![512, 498]);
        let sent = mock.written_bytes();
        assert_eq!(&sent[..8], &[0, 0, 0, 0, 0xF2, 0x03, 0, 0]);
        assert_eq!(&sent[1008..], &[0, 0]);

        assert_eq!(
            mock.call_counts(),
            CallCounts {
                claim: 1,
                release: 1,
                close: 1
            }
        );
        assert!(observer.events().contains(&DownloadEvent::Complete));

        std::fs::remove_file(input).ok();
    }

    #[test]
    fn test_device_not_found() {
        let input = temp_path("notfound.bin");
        std::fs::write(&input, b"payload").unwrap();

        let (session, _) = session(config_for(&input));
        let err = session
            .run_with(|vid, pid| {
                Err::<MockTransport, _>(TransportError::DeviceNotFound { vid, pid })
            })
            .unwrap_err();

        assert!(format!("{err:#}").contains("Device not found"));
        std::fs::remove_file(input).ok();
    }

    #[test]
    fn test_claim_failure_closes_device() {
        let input = temp_path("claim.bin");
        std::fs::write(&input, b"payload").unwrap();
        let mock = MockTransport::new();
        mock.fail_claim();

        let (session, _) = session(config_for(&input));
        let err = session.run_with(|_, _| Ok(mock.clone())).unwrap_err();

        assert!(format!("{err:#}").contains("Error claiming interface"));
        assert!(mock.get_writes().is_empty());
        let counts = mock.call_counts();
        assert_eq!(counts.close, 1);
        assert_eq!(counts.release, 0);
        assert!(mock.is_closed());
        std::fs::remove_file(input).ok();
    }

    #[test]
    fn test_transfer_failure_releases_and_closes() {
        let input = temp_path("xfer.bin");
        std::fs::write(&input, vec![1u8; 3000]).unwrap();
        let mock = MockTransport::new().with_max_write(512);
        mock.fail_write_after(2);

        let (session, observer) = session(config_for(&input));
        let err = session.run_with(|_, _| Ok(mock.clone())).unwrap_err();

        assert!(format!("{err:#}").contains("Stall"));
        assert_eq!(
            mock.call_counts(),
            CallCounts {
                claim: 1,
                release: 1,
                close: 1
            }
        );
        assert!(!observer.events().contains(&DownloadEvent::Complete));
        std::fs::remove_file(input).ok();
    }

    #[test]
    fn test_transfer_failure_still_settles() {
        let input = temp_path("settle.bin");
        std::fs::write(&input, vec![2u8; 3000]).unwrap();
        let mock = MockTransport::new().with_max_write(512);
        mock.fail_write_after(1);

        let mut config = config_for(&input);
        config.settle_delay_secs = 1;
        let (session, observer) = session(config);
        let start = std::time::Instant::now();
        let err = session.run_with(|_, _| Ok(mock.clone())).unwrap_err();

        assert!(format!("{err:#}").contains("Stall"));
        assert!(start.elapsed() >= Duration::from_secs(1));
        let events = observer.events();
        let settling = events
            .iter()
            .position(|e| {
                *e == DownloadEvent::PhaseChanged {
                    phase: DownloadPhase::Settling,
                }
            })
            .expect("no settle phase after failed send");
        let transmitting = events
            .iter()
            .position(|e| {
                *e == DownloadEvent::PhaseChanged {
                    phase: DownloadPhase::Transmitting,
                }
            })
            .unwrap();
        assert!(settling > transmitting);
        assert_eq!(mock.call_counts().release, 1);
        assert_eq!(mock.call_counts().close, 1);
        std::fs::remove_file(input).ok();
    }

    #[test]
    fn test_missing_config_names_file() {
        let path = temp_path("no-such-config.toml");
        let err = SessionConfig::load_from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("no-such-config.toml"));
    }

    #[test]
    fn test_missing_input_never_opens_device() {
        let opened = Cell::new(false);
        let (session, _) = session(config_for(&temp_path("does-not-exist.bin")));

        let err = session
            .run_with(|_, _| {
                opened.set(true);
                Ok(MockTransport::new())
            })
            .unwrap_err();

        assert!(format!("{err:#}").contains("Can't open input file"));
        assert!(!opened.get());
    }

    #[test]
    fn test_unknown_target_still_sends() {
        let input = temp_path("unknown.bin");
        std::fs::write(&input, b"abc").unwrap();
        let mock = MockTransport::new().with_product("Exynos7420");

        let (session, observer) = session(config_for(&input));
        let report = session.run_with(|_, _| Ok(mock.clone())).unwrap();

        assert_eq!(report.target, None);
        assert_eq!(mock.written_bytes().len(), 13);
        assert!(observer.events().contains(&DownloadEvent::TargetUnknown {
            product: Some("Exynos7420".to_string())
        }));
        std::fs::remove_file(input).ok();
    }

    #[test]
    fn test_response_is_saved() {
        let input = temp_path("resp-in.bin");
        let output = temp_path("resp-out.bin");
        std::fs::write(&input, b"payload").unwrap();
        let mock = MockTransport::new();
        mock.queue_read(&[0x11; 512]);
        mock.queue_read(&[0x22; 300]);
        mock.queue_read(&[]);

        let mut config = config_for(&input);
        config.output_path = Some(output.to_string_lossy().into_owned());
        let (session, _) = session(config);
        let report = session.run_with(|_, _| Ok(mock.clone())).unwrap();

        assert_eq!(report.collected_bytes, Some(812));
        assert_eq!(mock.read_calls(), 3);
        let saved = std::fs::read(&output).unwrap();
        assert_eq!(saved.len(), 812);
        assert_eq!(saved[0], 0x11);
        assert_eq!(saved[811], 0x22);

        std::fs::remove_file(input).ok();
        std::fs::remove_file(output).ok();
    }

    #[test]
    fn test_config_defaults_fill_missing_keys() {
        let config: SessionConfig = toml::from_str("input_path = \"payload.bin\"\n").unwrap();
        assert_eq!(config.input_path.as_deref(), Some("payload.bin"));
        assert_eq!(config.vendor_id, 0x18D1);
        assert_eq!(config.product_id, 0x4F00);
        assert_eq!(config.interface, 0);
        assert!(config.detach_kernel_driver);
        assert_eq!(config.settle_delay_secs, 5);
        assert_eq!(config.response_timeout_ms, 10);
    }

    #[test]
    fn test_config_file() {
        let path = temp_path("config.toml");
        let config = SessionConfig {
            output_path: Some("dump.bin".into()),
            log_level: Some("debug".into()),
            settle_delay_secs: 1,
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();

        let loaded = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        std::fs::remove_file(path).ok();
    }
}
