//! Power daemon backend (batteries and AC adapters)
//!
//! All state is read through daemon-exposed properties over the system bus;
//! there is no direct hardware access here. Devices live under the daemon's
//! object namespace and change via `PropertiesChanged` signals.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use hardware_types::{BatteryType, Capability, ChargeState, PropertyMap, PropertyValue, Udi};
use tracing::warn;
use zbus::names::InterfaceName;
use zbus::zvariant::OwnedObjectPath;
use zbus::{Connection, MatchRule, MessageStream};
use zbus_macros::proxy;

use super::{DeviceBackend, DeviceDescription, from_variant};
use crate::device::Device;
use crate::error::HardwareError;
use crate::iface::{AcAdapter, AcAdapterEvent, Battery, BatteryEvent, DeviceInterface, GenericInterface};
use crate::notify::{ChangeEvent, ChangeKind, Notifier};

const SERVICE: &str = "org.freedesktop.UPower";
const DEVICE_IFACE: &str = "org.freedesktop.UPower.Device";
const UDI_PREFIX: &str = "/org/freedesktop/UPower";

// Device type codes per the daemon's wire format.
const TYPE_LINE_POWER: u64 = 1;
const TYPE_BATTERY: u64 = 2;
const TYPE_UPS: u64 = 3;
const TYPE_MONITOR: u64 = 4;
const TYPE_MOUSE: u64 = 5;
const TYPE_KEYBOARD: u64 = 6;
const TYPE_PDA: u64 = 7;
const TYPE_PHONE: u64 = 8;

#[proxy(
    default_service = "org.freedesktop.UPower",
    default_path = "/org/freedesktop/UPower",
    interface = "org.freedesktop.UPower"
)]
pub trait UPower {
    fn enumerate_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    #[zbus(signal)]
    fn device_added(&self, device: OwnedObjectPath) -> zbus::Result<()>;

    #[zbus(signal)]
    fn device_removed(&self, device: OwnedObjectPath) -> zbus::Result<()>;
}

fn is_unknown_object(err: &zbus::Error) -> bool {
    match err {
        zbus::Error::MethodError(name, _msg, _info) => matches!(
            name.as_str(),
            "org.freedesktop.DBus.Error.UnknownObject"
                | "org.freedesktop.DBus.Error.UnknownInterface"
                | "org.freedesktop.DBus.Error.ServiceUnknown"
        ),
        _ => false,
    }
}

pub struct PowerBackend {
    connection: Connection,
    notifier: Arc<Notifier>,
}

impl PowerBackend {
    pub fn new(connection: Connection) -> Self {
        PowerBackend {
            connection,
            notifier: Arc::new(Notifier::new()),
        }
    }

    /// Subscribe to daemon signals and forward them into the notifier.
    /// Runs until the bus connection closes.
    pub async fn spawn_signal_pump(&self) -> Result<(), HardwareError> {
        let proxy = UPowerProxy::new(&self.connection).await?;
        let mut added = proxy.receive_device_added().await?;
        let mut removed = proxy.receive_device_removed().await?;

        let rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .sender(SERVICE)?
            .interface("org.freedesktop.DBus.Properties")?
            .member("PropertiesChanged")?
            .build();
        let mut changed = MessageStream::for_match_rule(rule, &self.connection, None).await?;

        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_added = added.next() => {
                        let Some(signal) = maybe_added else { break };
                        match signal.args() {
                            Ok(args) => notifier.notify(ChangeEvent {
                                kind: ChangeKind::Added,
                                udi: Udi::new(args.device.to_string()),
                            }),
                            Err(e) => warn!("failed to parse DeviceAdded args: {e}"),
                        }
                    }
                    maybe_removed = removed.next() => {
                        let Some(signal) = maybe_removed else { break };
                        match signal.args() {
                            Ok(args) => notifier.notify(ChangeEvent {
                                kind: ChangeKind::Removed,
                                udi: Udi::new(args.device.to_string()),
                            }),
                            Err(e) => warn!("failed to parse DeviceRemoved args: {e}"),
                        }
                    }
                    maybe_changed = changed.next() => {
                        let Some(Ok(msg)) = maybe_changed else { break };
                        if let Some(path) = msg.header().path() {
                            notifier.notify(ChangeEvent {
                                kind: ChangeKind::Changed,
                                udi: Udi::new(path.to_string()),
                            });
                        }
                    }
                }
            }
        });

        Ok(())
    }
}

#[async_trait]
impl DeviceBackend for PowerBackend {
    fn name(&self) -> &'static str {
        "power"
    }

    fn owns(&self, udi: &Udi) -> bool {
        udi.starts_with(UDI_PREFIX)
    }

    async fn all_devices(&self) -> Result<Vec<Udi>, HardwareError> {
        let proxy = UPowerProxy::new(&self.connection).await?;
        let paths = proxy.enumerate_devices().await?;
        Ok(paths
            .into_iter()
            .map(|p| Udi::new(p.to_string()))
            .collect())
    }

    async fn exists(&self, udi: &Udi) -> Result<bool, HardwareError> {
        match self.properties(udi).await {
            Ok(_) => Ok(true),
            Err(HardwareError::Bus(e)) if is_unknown_object(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn properties(&self, udi: &Udi) -> Result<PropertyMap, HardwareError> {
        let proxy = zbus::fdo::PropertiesProxy::builder(&self.connection)
            .destination(SERVICE)
            .map_err(zbus::Error::from)?
            .path(udi.as_str())
            .map_err(zbus::Error::from)?
            .build()
            .await
            .map_err(zbus::Error::from)?;
        let iface = InterfaceName::try_from(DEVICE_IFACE).map_err(zbus::Error::from)?;
        let raw = proxy
            .get_all(iface)
            .await
            .map_err(zbus::Error::from)?;

        let mut props = PropertyMap::new();
        for (key, value) in &raw {
            if let Some(converted) = from_variant(value) {
                props.insert(key.to_string(), converted);
            }
        }
        Ok(props)
    }

    fn describe(&self, _udi: &Udi, props: &PropertyMap) -> DeviceDescription {
        let vendor = text_prop(props, "Vendor");
        let product = text_prop(props, "Model");
        let is_adapter = type_code(props) == Some(TYPE_LINE_POWER);

        let description = if !product.is_empty() {
            product.clone()
        } else if is_adapter {
            "AC Adapter".to_string()
        } else {
            "Battery".to_string()
        };

        let mut emblems = Vec::new();
        if !is_adapter && charge_state(props) == ChargeState::Charging {
            emblems.push("charging".to_string());
        }

        DeviceDescription {
            parent_udi: Some(Udi::new(UDI_PREFIX)),
            vendor,
            product,
            description,
            icon: if is_adapter { "ac-adapter" } else { "battery" }.to_string(),
            emblems,
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

fn type_code(props: &PropertyMap) -> Option<u64> {
    props.get("Type").and_then(PropertyValue::as_u64)
}

fn text_prop(props: &PropertyMap, key: &str) -> String {
    props
        .get(key)
        .and_then(PropertyValue::as_str)
        .unwrap_or_default()
        .to_string()
}

fn charge_state(props: &PropertyMap) -> ChargeState {
    match props.get("State").and_then(PropertyValue::as_u64) {
        Some(1) | Some(5) => ChargeState::Charging,
        Some(2) | Some(6) => ChargeState::Discharging,
        _ => ChargeState::NoCharge,
    }
}

fn battery_type(props: &PropertyMap) -> BatteryType {
    match type_code(props) {
        Some(TYPE_BATTERY) => BatteryType::Primary,
        Some(TYPE_UPS) => BatteryType::Ups,
        Some(TYPE_MONITOR) => BatteryType::Monitor,
        Some(TYPE_MOUSE) => BatteryType::Mouse,
        Some(TYPE_KEYBOARD) => BatteryType::Keyboard,
        Some(TYPE_PDA) => BatteryType::Pda,
        Some(TYPE_PHONE) => BatteryType::Phone,
        _ => BatteryType::Unknown,
    }
}

fn charge_percent(props: &PropertyMap) -> i64 {
    let raw = props
        .get("Percentage")
        .and_then(PropertyValue::as_f64)
        .unwrap_or(0.0);
    (raw.round() as i64).clamp(0, 100)
}

/// The power daemon's capability predicate table.
pub(crate) fn supports(props: &PropertyMap, capability: Capability) -> bool {
    match capability {
        Capability::Generic => true,
        Capability::Battery => matches!(
            type_code(props),
            Some(TYPE_BATTERY..=TYPE_PHONE)
        ),
        Capability::AcAdapter => type_code(props) == Some(TYPE_LINE_POWER),
        _ => false,
    }
}

/// The power daemon's interface factory table.
pub(crate) fn instantiate<'a>(
    device: &'a Device,
    capability: Capability,
) -> Option<DeviceInterface<'a>> {
    match capability {
        Capability::Generic => Some(DeviceInterface::Generic(GenericInterface::new(device))),
        Capability::Battery => Some(DeviceInterface::Battery(Box::new(UPowerBattery::new(
            device,
        )))),
        Capability::AcAdapter => Some(DeviceInterface::AcAdapter(Box::new(UPowerAcAdapter::new(
            device,
        )))),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatteryReading {
    percent: i64,
    state: ChargeState,
    plugged: bool,
}

pub(crate) struct UPowerBattery<'a> {
    device: &'a Device,
    last: Mutex<Option<BatteryReading>>,
}

impl<'a> UPowerBattery<'a> {
    pub(crate) fn new(device: &'a Device) -> Self {
        UPowerBattery {
            device,
            last: Mutex::new(None),
        }
    }

    async fn reading(&self) -> Result<BatteryReading, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(BatteryReading {
            percent: charge_percent(&props),
            state: charge_state(&props),
            plugged: props
                .get("IsPresent")
                .and_then(PropertyValue::as_bool)
                .unwrap_or(false),
        })
    }
}

#[async_trait]
impl Battery for UPowerBattery<'_> {
    async fn is_plugged(&self) -> Result<bool, HardwareError> {
        Ok(self.reading().await?.plugged)
    }

    async fn battery_type(&self) -> Result<BatteryType, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(battery_type(&props))
    }

    async fn charge_percent(&self) -> Result<i64, HardwareError> {
        Ok(self.reading().await?.percent)
    }

    async fn is_rechargeable(&self) -> Result<bool, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(props
            .get("IsRechargeable")
            .and_then(PropertyValue::as_bool)
            .unwrap_or(false))
    }

    async fn charge_state(&self) -> Result<ChargeState, HardwareError> {
        Ok(self.reading().await?.state)
    }

    async fn poll_events(&self) -> Result<Vec<BatteryEvent>, HardwareError> {
        let fresh = self.reading().await?;
        let mut last = self.last.lock().expect("battery state poisoned");
        let events = match *last {
            None => Vec::new(),
            Some(previous) => {
                let mut events = Vec::new();
                if fresh.percent != previous.percent {
                    events.push(BatteryEvent::ChargePercentChanged(fresh.percent));
                }
                if fresh.state != previous.state {
                    events.push(BatteryEvent::ChargeStateChanged(fresh.state));
                }
                if fresh.plugged != previous.plugged {
                    events.push(BatteryEvent::PlugStateChanged(fresh.plugged));
                }
                events
            }
        };
        *last = Some(fresh);
        Ok(events)
    }
}

pub(crate) struct UPowerAcAdapter<'a> {
    device: &'a Device,
    last: Mutex<Option<bool>>,
}

impl<'a> UPowerAcAdapter<'a> {
    pub(crate) fn new(device: &'a Device) -> Self {
        UPowerAcAdapter {
            device,
            last: Mutex::new(None),
        }
    }

    async fn online(&self) -> Result<bool, HardwareError> {
        Ok(self
            .device
            .property("Online")
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }
}

#[async_trait]
impl AcAdapter for UPowerAcAdapter<'_> {
    async fn is_plugged(&self) -> Result<bool, HardwareError> {
        self.online().await
    }

    async fn poll_events(&self) -> Result<Vec<AcAdapterEvent>, HardwareError> {
        let fresh = self.online().await?;
        let mut last = self.last.lock().expect("adapter state poisoned");
        let events = match *last {
            Some(previous) if previous != fresh => vec![AcAdapterEvent::PlugStateChanged(fresh)],
            _ => Vec::new(),
        };
        *last = Some(fresh);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChangeEvent;
    use crate::testkit::FakeBackend;

    fn battery_props(percent: f64, state: u64) -> PropertyMap {
        PropertyMap::from([
            ("Type".to_string(), PropertyValue::UInt(TYPE_BATTERY)),
            ("Percentage".to_string(), PropertyValue::Double(percent)),
            ("State".to_string(), PropertyValue::UInt(state)),
            ("IsPresent".to_string(), PropertyValue::Bool(true)),
            ("IsRechargeable".to_string(), PropertyValue::Bool(true)),
        ])
    }

    #[test]
    fn type_codes_map_to_battery_kinds() {
        let mut props = PropertyMap::new();
        for (code, expected) in [
            (TYPE_BATTERY, BatteryType::Primary),
            (TYPE_UPS, BatteryType::Ups),
            (TYPE_MOUSE, BatteryType::Mouse),
            (TYPE_PHONE, BatteryType::Phone),
        ] {
            props.insert("Type".to_string(), PropertyValue::UInt(code));
            assert_eq!(battery_type(&props), expected);
        }
        props.insert("Type".to_string(), PropertyValue::UInt(99));
        assert_eq!(battery_type(&props), BatteryType::Unknown);
    }

    #[test]
    fn line_power_is_an_adapter_not_a_battery() {
        let props = PropertyMap::from([(
            "Type".to_string(),
            PropertyValue::UInt(TYPE_LINE_POWER),
        )]);
        assert!(supports(&props, Capability::AcAdapter));
        assert!(!supports(&props, Capability::Battery));
        assert!(supports(&props, Capability::Generic));
    }

    #[test]
    fn percentage_is_clamped_into_range() {
        let props = PropertyMap::from([(
            "Percentage".to_string(),
            PropertyValue::Double(104.2),
        )]);
        assert_eq!(charge_percent(&props), 100);
    }

    #[tokio::test]
    async fn charge_percent_change_emits_exactly_one_typed_event() {
        let udi = Udi::new("/org/example/devices/battery0");
        let backend = FakeBackend::with_device(udi.as_str(), battery_props(50.0, 2));
        let device = backend.clone().device(udi.as_str());

        assert!(device.query_capability(Capability::Battery).await.unwrap());
        let iface = device.interface(Capability::Battery).await.unwrap().unwrap();
        let battery = iface.as_battery().unwrap();

        assert_eq!(battery.charge_percent().await.unwrap(), 50);
        // Baseline observation; nothing has changed yet.
        assert!(battery.poll_events().await.unwrap().is_empty());

        backend.set_properties(&udi, battery_props(42.0, 2));
        backend.notifier_ref().notify(ChangeEvent {
            kind: ChangeKind::Changed,
            udi: udi.clone(),
        });

        let events = battery.poll_events().await.unwrap();
        assert_eq!(events, vec![BatteryEvent::ChargePercentChanged(42)]);

        // The event fires exactly once.
        assert!(battery.poll_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalidation_without_value_change_emits_no_typed_event() {
        let udi = Udi::new("/org/example/devices/battery0");
        let backend = FakeBackend::with_device(udi.as_str(), battery_props(50.0, 2));
        let device = backend.clone().device(udi.as_str());

        let iface = device.interface(Capability::Battery).await.unwrap().unwrap();
        let battery = iface.as_battery().unwrap();
        battery.poll_events().await.unwrap();

        // Same values re-published; raw invalidation alone must not emit.
        backend.set_properties(&udi, battery_props(50.0, 2));
        backend.notifier_ref().notify(ChangeEvent {
            kind: ChangeKind::Changed,
            udi: udi.clone(),
        });

        assert!(battery.poll_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_and_plug_changes_are_diffed_independently() {
        let udi = Udi::new("/org/example/devices/battery0");
        let backend = FakeBackend::with_device(udi.as_str(), battery_props(50.0, 2));
        let device = backend.clone().device(udi.as_str());

        let iface = device.interface(Capability::Battery).await.unwrap().unwrap();
        let battery = iface.as_battery().unwrap();
        battery.poll_events().await.unwrap();

        let mut props = battery_props(50.0, 1);
        props.insert("IsPresent".to_string(), PropertyValue::Bool(false));
        backend.set_properties(&udi, props);
        backend.notifier_ref().notify(ChangeEvent {
            kind: ChangeKind::Changed,
            udi: udi.clone(),
        });

        let events = battery.poll_events().await.unwrap();
        assert_eq!(
            events,
            vec![
                BatteryEvent::ChargeStateChanged(ChargeState::Charging),
                BatteryEvent::PlugStateChanged(false),
            ]
        );
    }
}
