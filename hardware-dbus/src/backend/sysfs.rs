//! Kernel device tree backend
//!
//! Reads device attributes directly from the kernel's exported tree (no
//! daemon round-trip) and listens for kernel uevents for add/remove/change.
//! The tree root is configurable so the backend can run against fixture
//! trees in tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hardware_types::{
    AudioDriver, AudioInterfaceType, Capability, NetworkProtocol, PropertyMap, PropertyValue,
    SoundcardType, Udi,
};
use tracing::debug;

use super::{DeviceBackend, DeviceDescription};
use crate::device::Device;
use crate::error::HardwareError;
use crate::iface::{
    AudioInterface, Button, Camera, DeviceInterface, DvbInterface, GenericInterface,
    NetworkInterface, PortableMediaPlayer, Processor, SerialInterface, SmartCardReader, Video,
};
use crate::notify::{ChangeEvent, ChangeKind, Notifier};

const UDI_PREFIX: &str = "/org/kernel";

/// Class directories scanned during enumeration.
const CLASSES: [&str; 6] = ["net", "tty", "sound", "video4linux", "dvb", "input"];

/// Linux requires the tree at /sys; overridable for tests.
const DEFAULT_ROOT: &str = "/sys";

pub struct SysfsBackend {
    root: PathBuf,
    notifier: Arc<Notifier>,
}

impl SysfsBackend {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        SysfsBackend {
            root: root.into(),
            notifier: Arc::new(Notifier::new()),
        }
    }

    /// Listen for kernel uevents on a netlink socket and forward them into
    /// the notifier. Runs on a blocking task until the socket closes.
    pub fn spawn_uevent_pump(&self) -> Result<(), HardwareError> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_KOBJECT_UEVENT,
            )
        };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // Group 1 carries kernel uevents.
        addr.nl_groups = 1;
        let rc = unsafe {
            libc::bind(
                fd,
                std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err.into());
        }

        let notifier = self.notifier.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                let n = unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
                if n <= 0 {
                    break;
                }
                match parse_uevent(&buf[..n as usize]) {
                    Some(event) => notifier.notify(event),
                    None => debug!("skipping unparseable uevent datagram"),
                }
            }
            unsafe { libc::close(fd) };
        });

        Ok(())
    }

    fn device_dir(&self, udi: &Udi) -> Option<PathBuf> {
        let rest = udi.as_str().strip_prefix(UDI_PREFIX)?.strip_prefix('/')?;
        let (kind, name) = rest.split_once('/')?;
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return None;
        }
        let dir = match kind {
            "cpu" => self.root.join("devices/system/cpu").join(name),
            "usb" => self.root.join("bus/usb/devices").join(name),
            class if CLASSES.contains(&class) => self.root.join("class").join(class).join(name),
            _ => return None,
        };
        Some(dir)
    }

    fn scan_dir(&self, dir: &Path, kind: &str, out: &mut Vec<Udi>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if kind == "cpu" && !is_cpu_dir(&name) {
                continue;
            }
            out.push(Udi::new(format!("{UDI_PREFIX}/{kind}/{name}")));
        }
    }
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn is_cpu_dir(name: &str) -> bool {
    name.strip_prefix("cpu")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

fn trailing_number(name: &str) -> Option<i64> {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Parse one kernel uevent datagram: `action@devpath` followed by
/// NUL-separated `KEY=VALUE` pairs.
fn parse_uevent(data: &[u8]) -> Option<ChangeEvent> {
    let mut segments = data.split(|&b| b == 0).filter(|s| !s.is_empty());

    let header = std::str::from_utf8(segments.next()?).ok()?;
    let (action, devpath) = header.split_once('@')?;
    let kind = match action {
        "add" => ChangeKind::Added,
        "remove" => ChangeKind::Removed,
        "change" | "move" | "bind" | "unbind" => ChangeKind::Changed,
        _ => return None,
    };

    let mut subsystem = None;
    for segment in segments {
        let Ok(pair) = std::str::from_utf8(segment) else {
            continue;
        };
        if let Some(value) = pair.strip_prefix("SUBSYSTEM=") {
            subsystem = Some(value.to_string());
        }
    }

    let name = devpath.rsplit('/').next()?;
    let subsystem = subsystem?;
    Some(ChangeEvent {
        kind,
        udi: Udi::new(format!("{UDI_PREFIX}/{subsystem}/{name}")),
    })
}

fn read_attribute(path: &Path) -> Option<PropertyValue> {
    let raw = std::fs::read(path).ok()?;
    // Attribute files are one short line of text.
    if raw.len() > 4096 {
        return None;
    }
    let text = String::from_utf8_lossy(&raw).trim().to_string();
    if let Ok(i) = text.parse::<i64>() {
        return Some(PropertyValue::Int(i));
    }
    Some(PropertyValue::Text(text))
}

fn text_prop(props: &PropertyMap, key: &str) -> String {
    props
        .get(key)
        .and_then(PropertyValue::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl DeviceBackend for SysfsBackend {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn owns(&self, udi: &Udi) -> bool {
        udi.starts_with(UDI_PREFIX)
    }

    async fn all_devices(&self) -> Result<Vec<Udi>, HardwareError> {
        let mut udis = Vec::new();
        for class in CLASSES {
            self.scan_dir(&self.root.join("class").join(class), class, &mut udis);
        }
        self.scan_dir(&self.root.join("devices/system/cpu"), "cpu", &mut udis);
        self.scan_dir(&self.root.join("bus/usb/devices"), "usb", &mut udis);
        udis.sort();
        Ok(udis)
    }

    async fn exists(&self, udi: &Udi) -> Result<bool, HardwareError> {
        Ok(self.device_dir(udi).is_some_and(|dir| dir.is_dir()))
    }

    async fn properties(&self, udi: &Udi) -> Result<PropertyMap, HardwareError> {
        let dir = self
            .device_dir(udi)
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| HardwareError::UnknownDevice(udi.clone()))?;

        let mut props = PropertyMap::new();
        let rest = udi.as_str().strip_prefix(UDI_PREFIX).unwrap_or_default();
        if let Some((kind, name)) = rest.trim_start_matches('/').split_once('/') {
            props.insert("Subsystem".to_string(), PropertyValue::from(kind));
            props.insert("Name".to_string(), PropertyValue::from(name));
        }

        // One pass over the attribute files; unreadable entries are skipped,
        // uevent contents are folded in as KEY=VALUE pairs.
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if file_name == "uevent" {
                    if let Ok(contents) = std::fs::read_to_string(&path) {
                        for line in contents.lines() {
                            if let Some((key, value)) = line.split_once('=') {
                                props.insert(key.to_string(), PropertyValue::from(value));
                            }
                        }
                    }
                    continue;
                }
                if let Some(value) = read_attribute(&path) {
                    props.insert(file_name, value);
                }
            }
        }

        // Wireless interfaces carry a marker directory rather than an
        // attribute file.
        if dir.join("wireless").is_dir() || dir.join("phy80211").is_dir() {
            props.insert("Wireless".to_string(), PropertyValue::Bool(true));
        }
        if let Some(value) = read_attribute(&dir.join("cpufreq/cpuinfo_max_freq")) {
            props.insert("CpufreqMaxFreq".to_string(), value);
        }

        Ok(props)
    }

    fn describe(&self, udi: &Udi, props: &PropertyMap) -> DeviceDescription {
        let subsystem = text_prop(props, "Subsystem");
        let name = text_prop(props, "Name");
        // USB devices export their identity directly; everything else gets a
        // subsystem-derived description.
        let vendor = text_prop(props, "manufacturer");
        let product = text_prop(props, "product");

        let (description, icon) = match subsystem.as_str() {
            "net" => (format!("Network Interface ({name})"), "network-wired"),
            "tty" => (format!("Serial Port ({name})"), "modem"),
            "sound" => (format!("Sound Card ({name})"), "audio-card"),
            "video4linux" => (format!("Video Device ({name})"), "camera-video"),
            "dvb" => (format!("DVB Interface ({name})"), "video-television"),
            "input" => (text_prop(props, "NAME"), "input-keyboard"),
            "cpu" => (format!("Processor {}", trailing_number(&name).unwrap_or(0)), "cpu"),
            "usb" if !product.is_empty() => (product.clone(), "drive-removable-media"),
            _ => (name.clone(), "preferences-desktop"),
        };

        DeviceDescription {
            parent_udi: Some(Udi::new(UDI_PREFIX)),
            vendor,
            product: if product.is_empty() { name } else { product },
            description,
            icon: icon.to_string(),
            emblems: Vec::new(),
        }
    }

    fn supports(&self, props: &PropertyMap, capability: Capability) -> bool {
        supports(props, capability)
    }

    fn instantiate<'a>(
        &self,
        device: &'a Device,
        capability: Capability,
    ) -> Option<DeviceInterface<'a>> {
        instantiate(device, capability)
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

fn usb_interface_class(props: &PropertyMap) -> Option<i64> {
    match props.get("bInterfaceClass") {
        Some(PropertyValue::Int(i)) => Some(*i),
        // Attribute files encode the class in hex without a prefix.
        Some(PropertyValue::Text(s)) => i64::from_str_radix(s, 16).ok(),
        _ => None,
    }
}

fn is_button_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.contains("button") || lower.contains("lid")
}

/// The kernel tree's capability predicate table.
pub(crate) fn supports(props: &PropertyMap, capability: Capability) -> bool {
    let subsystem = props.get("Subsystem").and_then(PropertyValue::as_str);
    let name = props.get("Name").and_then(PropertyValue::as_str).unwrap_or("");
    match capability {
        Capability::Generic => true,
        Capability::NetworkInterface => subsystem == Some("net"),
        Capability::SerialInterface => {
            subsystem == Some("tty")
                && (name.starts_with("ttyS")
                    || name.starts_with("ttyUSB")
                    || name.starts_with("ttyACM"))
        }
        Capability::AudioInterface => subsystem == Some("sound") && name.starts_with("card"),
        Capability::Video => subsystem == Some("video4linux"),
        Capability::DvbInterface => subsystem == Some("dvb"),
        Capability::Button => {
            subsystem == Some("input")
                && props
                    .get("NAME")
                    .and_then(PropertyValue::as_str)
                    .is_some_and(is_button_name)
        }
        Capability::Processor => subsystem == Some("cpu"),
        Capability::Camera => {
            subsystem == Some("usb") && usb_interface_class(props) == Some(0x06)
        }
        Capability::SmartCardReader => {
            subsystem == Some("usb") && usb_interface_class(props) == Some(0x0b)
        }
        Capability::PortableMediaPlayer => {
            subsystem == Some("usb")
                && props
                    .get("interface")
                    .and_then(PropertyValue::as_str)
                    .is_some_and(|s| s.contains("MTP"))
        }
        _ => false,
    }
}

/// The kernel tree's interface factory table.
pub(crate) fn instantiate<'a>(
    device: &'a Device,
    capability: Capability,
) -> Option<DeviceInterface<'a>> {
    match capability {
        Capability::Generic => Some(DeviceInterface::Generic(GenericInterface::new(device))),
        Capability::NetworkInterface => Some(DeviceInterface::NetworkInterface(Box::new(
            SysfsNetworkInterface { device },
        ))),
        Capability::SerialInterface => Some(DeviceInterface::SerialInterface(Box::new(
            SysfsSerialInterface { device },
        ))),
        Capability::AudioInterface => Some(DeviceInterface::AudioInterface(Box::new(
            SysfsAudioInterface { device },
        ))),
        Capability::Video => Some(DeviceInterface::Video(Box::new(SysfsVideo { device }))),
        Capability::DvbInterface => Some(DeviceInterface::DvbInterface(Box::new(
            SysfsDvbInterface { device },
        ))),
        Capability::Button => Some(DeviceInterface::Button(Box::new(SysfsButton { device }))),
        Capability::Processor => Some(DeviceInterface::Processor(Box::new(SysfsProcessor {
            device,
        }))),
        Capability::Camera => Some(DeviceInterface::Camera(Box::new(SysfsCamera { device }))),
        Capability::SmartCardReader => Some(DeviceInterface::SmartCardReader(Box::new(
            SysfsSmartCardReader { device },
        ))),
        Capability::PortableMediaPlayer => Some(DeviceInterface::PortableMediaPlayer(Box::new(
            SysfsPortableMediaPlayer { device },
        ))),
        _ => None,
    }
}

struct SysfsNetworkInterface<'a> {
    device: &'a Device,
}

#[async_trait]
impl NetworkInterface for SysfsNetworkInterface<'_> {
    async fn iface_name(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(text_prop(&props, "Name"))
    }

    async fn hw_address(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(text_prop(&props, "address"))
    }

    async fn iface_index(&self) -> Result<i64, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(props
            .get("ifindex")
            .and_then(PropertyValue::as_i64)
            .unwrap_or(-1))
    }

    async fn is_wireless(&self) -> Result<bool, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(props
            .get("Wireless")
            .and_then(PropertyValue::as_bool)
            .unwrap_or(false))
    }
}

struct SysfsSerialInterface<'a> {
    device: &'a Device,
}

#[async_trait]
impl SerialInterface for SysfsSerialInterface<'_> {
    async fn driver_handle(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(format!("/dev/{}", text_prop(&props, "Name")))
    }

    async fn serial_type(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        let name = text_prop(&props, "Name");
        Ok(if name.starts_with("ttyUSB") || name.starts_with("ttyACM") {
            "usb".to_string()
        } else {
            "platform".to_string()
        })
    }

    async fn port(&self) -> Result<i64, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(trailing_number(&text_prop(&props, "Name")).unwrap_or(-1))
    }
}

struct SysfsAudioInterface<'a> {
    device: &'a Device,
}

#[async_trait]
impl AudioInterface for SysfsAudioInterface<'_> {
    async fn driver(&self) -> Result<AudioDriver, HardwareError> {
        Ok(AudioDriver::Alsa)
    }

    async fn driver_handle(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        let number = trailing_number(&text_prop(&props, "Name")).unwrap_or(0);
        Ok(format!("hw:{number}"))
    }

    async fn name(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        let id = text_prop(&props, "id");
        Ok(if id.is_empty() {
            text_prop(&props, "Name")
        } else {
            id
        })
    }

    async fn device_type(&self) -> Result<AudioInterfaceType, HardwareError> {
        Ok(AudioInterfaceType::AudioControl)
    }

    async fn soundcard_type(&self) -> Result<SoundcardType, HardwareError> {
        let props = self.device.all_properties().await?;
        let id = text_prop(&props, "id").to_ascii_lowercase();
        Ok(if id.contains("usb") {
            SoundcardType::UsbSoundcard
        } else if id.contains("modem") {
            SoundcardType::Modem
        } else {
            SoundcardType::InternalSoundcard
        })
    }
}

struct SysfsVideo<'a> {
    device: &'a Device,
}

#[async_trait]
impl Video for SysfsVideo<'_> {
    async fn supported_protocols(&self) -> Result<Vec<String>, HardwareError> {
        Ok(vec!["video4linux".to_string()])
    }

    async fn supported_drivers(&self) -> Result<Vec<String>, HardwareError> {
        Ok(vec!["video4linux2".to_string()])
    }

    async fn driver_handle(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(format!("/dev/{}", text_prop(&props, "Name")))
    }
}

struct SysfsDvbInterface<'a> {
    device: &'a Device,
}

#[async_trait]
impl DvbInterface for SysfsDvbInterface<'_> {
    async fn device(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        // dvb0.frontend0 -> /dev/dvb/adapter0/frontend0
        let name = text_prop(&props, "Name");
        match name.split_once('.') {
            Some((adapter, node)) => Ok(format!(
                "/dev/dvb/adapter{}/{node}",
                trailing_number(adapter).unwrap_or(0)
            )),
            None => Ok(format!("/dev/dvb/{name}")),
        }
    }

    async fn device_adapter(&self) -> Result<i64, HardwareError> {
        let props = self.device.all_properties().await?;
        let name = text_prop(&props, "Name");
        Ok(name
            .split_once('.')
            .and_then(|(adapter, _)| trailing_number(adapter))
            .unwrap_or(-1))
    }

    async fn device_index(&self) -> Result<i64, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(trailing_number(&text_prop(&props, "Name")).unwrap_or(-1))
    }
}

struct SysfsButton<'a> {
    device: &'a Device,
}

#[async_trait]
impl Button for SysfsButton<'_> {
    async fn button_type(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        let name = text_prop(&props, "NAME").to_ascii_lowercase();
        Ok(if name.contains("lid") {
            "lid".to_string()
        } else if name.contains("power") {
            "power".to_string()
        } else if name.contains("sleep") {
            "sleep".to_string()
        } else {
            "unknown".to_string()
        })
    }

    async fn has_state(&self) -> Result<bool, HardwareError> {
        let button_type = self.button_type().await?;
        Ok(button_type == "lid")
    }

    async fn state_value(&self) -> Result<bool, HardwareError> {
        Ok(false)
    }
}

struct SysfsProcessor<'a> {
    device: &'a Device,
}

#[async_trait]
impl Processor for SysfsProcessor<'_> {
    async fn number(&self) -> Result<i64, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(trailing_number(&text_prop(&props, "Name")).unwrap_or(-1))
    }

    async fn max_speed(&self) -> Result<i64, HardwareError> {
        let props = self.device.all_properties().await?;
        // cpufreq reports kHz; callers expect MHz.
        Ok(props
            .get("CpufreqMaxFreq")
            .and_then(PropertyValue::as_i64)
            .map(|khz| khz / 1000)
            .unwrap_or(0))
    }

    async fn can_change_frequency(&self) -> Result<bool, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(props.contains_key("CpufreqMaxFreq"))
    }
}

struct SysfsCamera<'a> {
    device: &'a Device,
}

#[async_trait]
impl Camera for SysfsCamera<'_> {
    async fn supported_protocols(&self) -> Result<Vec<NetworkProtocol>, HardwareError> {
        let _ = self.device;
        Ok(vec![NetworkProtocol::Ptp])
    }

    async fn supported_drivers(&self) -> Result<Vec<String>, HardwareError> {
        Ok(vec!["gphoto".to_string()])
    }
}

struct SysfsPortableMediaPlayer<'a> {
    device: &'a Device,
}

#[async_trait]
impl PortableMediaPlayer for SysfsPortableMediaPlayer<'_> {
    async fn supported_protocols(&self) -> Result<Vec<NetworkProtocol>, HardwareError> {
        let _ = self.device;
        Ok(vec![NetworkProtocol::Mtp])
    }

    async fn supported_drivers(&self) -> Result<Vec<String>, HardwareError> {
        Ok(vec!["mtp".to_string()])
    }
}

struct SysfsSmartCardReader<'a> {
    device: &'a Device,
}

#[async_trait]
impl SmartCardReader for SysfsSmartCardReader<'_> {
    async fn reader_type(&self) -> Result<String, HardwareError> {
        let _ = self.device;
        Ok("ccid".to_string())
    }
}
