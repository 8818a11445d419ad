//! Typed characteristic registry for a lock accessory.
//!
//! Each accessory maps the [`Characteristic`]s it exposes to a getter and an
//! optional setter. The registry is built once per lock by
//! [`AccessoryRegistry::for_controller`] and dispatches reads and writes
//! coming from the accessory framework (or its HTTP stand-in).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use sesame_types::characteristic::{LOCK_SECURED, LOCK_UNSECURED};
use sesame_types::{Characteristic, HistoryKind, LockDevice, MANUFACTURER, MODEL};

use crate::controller::LockController;
use crate::error::{Error, Result};

/// Boxed characteristic getter.
pub type Getter = Box<dyn Fn() -> BoxFuture<'static, Result<u32>> + Send + Sync>;

/// Boxed characteristic setter.
pub type Setter = Box<dyn Fn(u32) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Accessory information service values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryInfo {
    /// Display name.
    pub name: String,
    /// Manufacturer.
    pub manufacturer: String,
    /// Model.
    pub model: String,
    /// Serial number.
    pub serial: String,
    /// Stable accessory UUID.
    pub uuid: uuid::Uuid,
}

impl AccessoryInfo {
    /// Accessory information for a discovered lock.
    pub fn for_device(device: &LockDevice) -> Self {
        Self {
            name: device.nickname.clone(),
            manufacturer: MANUFACTURER.to_string(),
            model: MODEL.to_string(),
            serial: device.serial.clone(),
            uuid: device.accessory_uuid(),
        }
    }
}

struct Handlers {
    getter: Getter,
    setter: Option<Setter>,
}

/// Characteristic handlers of one accessory.
pub struct AccessoryRegistry {
    info: AccessoryInfo,
    handlers: BTreeMap<Characteristic, Handlers>,
}

impl std::fmt::Debug for AccessoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessoryRegistry")
            .field("info", &self.info)
            .field("characteristics", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AccessoryRegistry {
    /// Create an empty registry.
    pub fn new(info: AccessoryInfo) -> Self {
        Self {
            info,
            handlers: BTreeMap::new(),
        }
    }

    /// Register a getter, replacing any previous handlers of `characteristic`.
    pub fn on_get<F, Fut>(&mut self, characteristic: Characteristic, getter: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u32>> + Send + 'static,
    {
        self.handlers.insert(
            characteristic,
            Handlers {
                getter: Box::new(move || getter().boxed()),
                setter: None,
            },
        );
        self
    }

    /// Register a setter for an already registered characteristic.
    pub fn on_set<F, Fut>(&mut self, characteristic: Characteristic, setter: F) -> &mut Self
    where
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if let Some(handlers) = self.handlers.get_mut(&characteristic) {
            handlers.setter = Some(Box::new(move |value| setter(value).boxed()));
        }
        self
    }

    /// Accessory information.
    pub fn info(&self) -> &AccessoryInfo {
        &self.info
    }

    /// Registered characteristics, in a stable order.
    pub fn characteristics(&self) -> impl Iterator<Item = Characteristic> + '_ {
        self.handlers.keys().copied()
    }

    /// Whether `characteristic` is registered.
    pub fn supports(&self, characteristic: Characteristic) -> bool {
        self.handlers.contains_key(&characteristic)
    }

    /// Whether `characteristic` accepts writes.
    pub fn is_writable(&self, characteristic: Characteristic) -> bool {
        self.handlers
            .get(&characteristic)
            .is_some_and(|h| h.setter.is_some())
    }

    /// Read a characteristic.
    pub async fn get(&self, characteristic: Characteristic) -> Result<u32> {
        let handlers = self
            .handlers
            .get(&characteristic)
            .ok_or(Error::UnsupportedCharacteristic(characteristic))?;
        (handlers.getter)().await
    }

    /// Write a characteristic.
    pub async fn set(&self, characteristic: Characteristic, value: u32) -> Result<()> {
        let handlers = self
            .handlers
            .get(&characteristic)
            .ok_or(Error::UnsupportedCharacteristic(characteristic))?;
        let setter = handlers
            .setter
            .as_ref()
            .ok_or(Error::ReadOnly(characteristic))?;
        setter(value).await
    }

    /// Build the registry of a lock accessory.
    ///
    /// Registers the lock mechanism and battery services, plus the contact or
    /// motion sensor presentation of the history depending on the
    /// controller's history kind.
    pub fn for_controller(controller: &Arc<LockController>) -> Self {
        let mut registry = Self::new(AccessoryInfo::for_device(controller.device()));

        // Lock mechanism
        let c = Arc::clone(controller);
        registry.on_get(Characteristic::LockCurrentState, move || {
            let c = Arc::clone(&c);
            async move { c.current_lock_state().await }
        });
        let c = Arc::clone(controller);
        registry.on_get(Characteristic::LockTargetState, move || {
            let c = Arc::clone(&c);
            async move { c.target_lock_state().await }
        });
        let c = Arc::clone(controller);
        registry.on_set(Characteristic::LockTargetState, move |value| {
            // Acknowledged immediately; the command settles on the device queue.
            let result = match value {
                LOCK_SECURED => Ok(true),
                LOCK_UNSECURED => Ok(false),
                value => Err(Error::InvalidValue {
                    characteristic: Characteristic::LockTargetState,
                    value,
                }),
            }
            .map(|target| {
                c.set_target_lock_state(target);
            });
            async move { result }
        });

        // Battery
        let c = Arc::clone(controller);
        registry.on_get(Characteristic::BatteryLevel, move || {
            let c = Arc::clone(&c);
            async move { c.battery_level().await }
        });
        let c = Arc::clone(controller);
        registry.on_get(Characteristic::ChargingState, move || {
            let value = c.charging_state();
            async move { Ok(value) }
        });
        let c = Arc::clone(controller);
        registry.on_get(Characteristic::StatusLowBattery, move || {
            let c = Arc::clone(&c);
            async move { c.low_battery_status().await }
        });

        match controller.config().history_kind {
            HistoryKind::Door => {
                let c = Arc::clone(controller);
                registry.on_get(Characteristic::ContactSensorState, move || {
                    let c = Arc::clone(&c);
                    async move { Ok(c.contact_sensor_state().await) }
                });
                Self::register_activation(&mut registry, controller);
                let c = Arc::clone(controller);
                registry.on_get(Characteristic::OpenDuration, move || {
                    let c = Arc::clone(&c);
                    async move { Ok(c.open_duration().await) }
                });
                let c = Arc::clone(controller);
                registry.on_get(Characteristic::ClosedDuration, move || {
                    let c = Arc::clone(&c);
                    async move { Ok(c.closed_duration().await) }
                });
                let c = Arc::clone(controller);
                registry.on_get(Characteristic::TimesOpened, move || {
                    let c = Arc::clone(&c);
                    async move { Ok(c.times_opened().await) }
                });
                let c = Arc::clone(controller);
                registry.on_get(Characteristic::ResetTotal, move || {
                    let c = Arc::clone(&c);
                    async move { Ok(c.reset_total().await) }
                });
                let c = Arc::clone(controller);
                registry.on_set(Characteristic::ResetTotal, move |value| {
                    let c = Arc::clone(&c);
                    async move { c.reset_totals(value).await }
                });
            }
            HistoryKind::Motion => {
                let c = Arc::clone(controller);
                registry.on_get(Characteristic::MotionDetected, move || {
                    let c = Arc::clone(&c);
                    async move { Ok(c.motion_detected().await) }
                });
                let c = Arc::clone(controller);
                registry.on_get(Characteristic::Sensitivity, move || {
                    let value = c.sensitivity();
                    async move { Ok(value) }
                });
                Self::register_activation(&mut registry, controller);
                let c = Arc::clone(controller);
                registry.on_get(Characteristic::Duration, move || {
                    let value = c.duration();
                    async move { Ok(value) }
                });
            }
        }

        registry
    }

    fn register_activation(registry: &mut Self, controller: &Arc<LockController>) {
        let c = Arc::clone(controller);
        registry.on_get(Characteristic::LastActivation, move || {
            let c = Arc::clone(&c);
            async move { Ok(c.last_activation().await) }
        });
    }
}
