//! # Serial Port Access
//!
//! Type-erased async serial ports and the opener seam the link uses to
//! acquire them.
//!
//! Anything `AsyncRead + AsyncWrite + Unpin + Send` can stand in for the
//! physical port, which is what makes the link testable: production code
//! opens a `tokio_serial::SerialStream`, tests hand over one end of a
//! `tokio::io::duplex` pair and play the controller from the other end.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use crate::error::Result;

/// Trait alias for async serial port I/O
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port
pub type DynPort = Box<dyn SerialPortIO>;

/// Opens serial ports on demand.
///
/// The link goes back to this seam every time it (re)connects, so swapping
/// the implementation swaps what "plugging in the rotor" means. Tests use
/// a mock that fails a few times and then answers with an in-memory
/// duplex stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortOpener: Send + Sync {
    /// Open the port at `path` with rotor controller settings.
    ///
    /// # Errors
    ///
    /// Returns error if the device is missing, busy, or refuses the
    /// requested baud rate.
    async fn open(&self, path: &str, baud_rate: u32) -> Result<DynPort>;
}

/// Opens real serial ports with GS-232B settings (8 data bits, no
/// parity, one stop bit, no flow control)
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

#[async_trait]
impl PortOpener for SerialOpener {
    async fn open(&self, path: &str, baud_rate: u32) -> Result<DynPort> {
        let stream = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(Duration::from_secs(1))
            .open_native_async()?;

        debug!("Opened serial port {} at {} baud", path, baud_rate);
        Ok(Box::new(stream))
    }
}

/// One entry from the system's serial port enumeration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortIdentity {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub path: String,
    /// Path plus description, for dropdown-style display
    pub friendly_name: String,
    /// What kind of device sits behind the path
    pub description: String,
    /// Hardware identifier (USB VID:PID and serial number where known)
    pub hwid: String,
}

impl From<tokio_serial::SerialPortInfo> for PortIdentity {
    fn from(info: tokio_serial::SerialPortInfo) -> Self {
        let (description, hwid) = match info.port_type {
            tokio_serial::SerialPortType::UsbPort(usb) => {
                let description = usb
                    .product
                    .or(usb.manufacturer)
                    .unwrap_or_else(|| "USB serial device".to_string());
                let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(serial) = usb.serial_number {
                    hwid.push_str(&format!(" SER={serial}"));
                }
                (description, hwid)
            }
            tokio_serial::SerialPortType::PciPort => {
                ("PCI serial device".to_string(), "n/a".to_string())
            }
            tokio_serial::SerialPortType::BluetoothPort => {
                ("Bluetooth serial device".to_string(), "n/a".to_string())
            }
            tokio_serial::SerialPortType::Unknown => {
                ("Serial device".to_string(), "n/a".to_string())
            }
        };

        Self {
            friendly_name: format!("{} - {}", info.port_name, description),
            path: info.port_name,
            description,
            hwid,
        }
    }
}

/// List the serial ports currently visible to the system.
///
/// # Errors
///
/// Returns error if the platform enumeration fails outright; an empty
/// list is not an error.
pub fn available_ports() -> Result<Vec<PortIdentity>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports.into_iter().map(PortIdentity::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_duplex_stream_satisfies_port_contract() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut port: DynPort = Box::new(device);

        host.write_all(b"AZ=123 EL=045\r").await.unwrap();

        let mut buf = [0u8; 32];
        let n = port.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"AZ=123 EL=045\r");

        port.write_all(b"C2\r").await.unwrap();
        let n = host.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"C2\r");
    }

    #[tokio::test]
    async fn test_scripted_stream_satisfies_port_contract() {
        // A fully scripted exchange: one poll out, one readout back
        let mock = tokio_test::io::Builder::new()
            .write(b"C2\r")
            .read(b"AZ=123 EL=045\r")
            .build();
        let mut port: DynPort = Box::new(mock);

        port.write_all(b"C2\r").await.unwrap();

        let mut buf = [0u8; 32];
        let n = port.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"AZ=123 EL=045\r");
    }

    #[tokio::test]
    async fn test_mock_opener_returns_configured_port() {
        let mut opener = MockPortOpener::new();
        opener.expect_open().returning(|_, _| {
            let (_host, device) = tokio::io::duplex(64);
            Ok(Box::new(device) as DynPort)
        });

        let result = opener.open("/dev/ttyUSB0", 9600).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_open_missing_device_fails() {
        let opener = SerialOpener;
        let result = opener.open("/dev/nonexistent_rotor_port_12345", 9600).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_port_identity_from_usb_info() {
        let info = tokio_serial::SerialPortInfo {
            port_name: "/dev/ttyUSB0".to_string(),
            port_type: tokio_serial::SerialPortType::UsbPort(tokio_serial::UsbPortInfo {
                vid: 0x0403,
                pid: 0x6001,
                serial_number: Some("A7004nbX".to_string()),
                manufacturer: Some("FTDI".to_string()),
                product: Some("FT232R USB UART".to_string()),
            }),
        };

        let identity = PortIdentity::from(info);
        assert_eq!(identity.path, "/dev/ttyUSB0");
        assert_eq!(identity.description, "FT232R USB UART");
        assert_eq!(identity.friendly_name, "/dev/ttyUSB0 - FT232R USB UART");
        assert_eq!(identity.hwid, "USB VID:PID=0403:6001 SER=A7004nbX");
    }

    #[test]
    fn test_port_identity_usb_without_product_uses_manufacturer() {
        let info = tokio_serial::SerialPortInfo {
            port_name: "COM3".to_string(),
            port_type: tokio_serial::SerialPortType::UsbPort(tokio_serial::UsbPortInfo {
                vid: 0x067B,
                pid: 0x2303,
                serial_number: None,
                manufacturer: Some("Prolific".to_string()),
                product: None,
            }),
        };

        let identity = PortIdentity::from(info);
        assert_eq!(identity.description, "Prolific");
        assert_eq!(identity.hwid, "USB VID:PID=067B:2303");
    }

    #[test]
    fn test_port_identity_from_unknown_info() {
        let info = tokio_serial::SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: tokio_serial::SerialPortType::Unknown,
        };

        let identity = PortIdentity::from(info);
        assert_eq!(identity.description, "Serial device");
        assert_eq!(identity.friendly_name, "/dev/ttyS0 - Serial device");
        assert_eq!(identity.hwid, "n/a");
    }
}
