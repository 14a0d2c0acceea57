//! In-process persistence engine.
//!
//! All tables live behind one `RwLock`. Reads go through [`Store::read`];
//! every mutation goes through a [`Transaction`], which holds the write lock,
//! records an undo entry for each change and replays the undo log when it is
//! dropped without [`Transaction::commit`]. Constraints are checked at write
//! time, so a failed write leaves the transaction usable only for rollback.
//!
//! The `order_code` index keeps the codes of deleted deliveries, so a code is
//! never handed out twice.

use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::delivery::{Delivery, OrderCode};
use crate::models::driver::Driver;
use crate::models::location::LocationPing;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("duplicate value {value:?} for unique column {column}")]
    UniqueViolation { column: &'static str, value: String },

    #[error("{table} row {id} references a missing {referenced} row")]
    ForeignKeyViolation {
        table: &'static str,
        id: Uuid,
        referenced: &'static str,
    },

    #[error("{table} row {id} is still referenced by {dependents} {dependent_table} row(s)")]
    Restricted {
        table: &'static str,
        id: Uuid,
        dependent_table: &'static str,
        dependents: usize,
    },

    #[error("{table} row {id} not found")]
    RowNotFound { table: &'static str, id: Uuid },

    #[error("column {column} cannot be changed once written")]
    ImmutableColumn { column: &'static str },

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
pub struct Tables {
    drivers: HashMap<Uuid, Driver>,
    deliveries: HashMap<Uuid, Delivery>,
    pings: HashMap<Uuid, LocationPing>,
    order_codes: HashMap<OrderCode, Uuid>,
}

impl Tables {
    pub fn driver(&self, id: Uuid) -> Option<&Driver> {
        self.drivers.get(&id)
    }

    pub fn drivers(&self) -> Vec<Driver> {
        let mut drivers: Vec<Driver> = self.drivers.values().cloned().collect();
        drivers.sort_by_key(|d| (d.created_at, d.id));
        drivers
    }

    /// Oldest driver registered with this license and plate.
    pub fn driver_by_credentials(&self, license_number: &str, vehicle_plate: &str) -> Option<&Driver> {
        self.drivers
            .values()
            .filter(|d| d.license_number == license_number && d.vehicle_plate == vehicle_plate)
            .min_by_key(|d| (d.created_at, d.id))
    }

    pub fn delivery(&self, id: Uuid) -> Option<&Delivery> {
        self.deliveries.get(&id)
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        sorted_deliveries(self.deliveries.values())
    }

    pub fn deliveries_of_driver(&self, driver_id: Uuid) -> impl Iterator<Item = &Delivery> + '_ {
        self.deliveries
            .values()
            .filter(move |d| d.driver_id == driver_id)
    }

    pub fn deliveries_for_driver(&self, driver_id: Uuid) -> Vec<Delivery> {
        sorted_deliveries(self.deliveries_of_driver(driver_id))
    }

    pub fn delivery_by_code(&self, code: &OrderCode) -> Option<&Delivery> {
        self.order_codes
            .get(code)
            .and_then(|id| self.deliveries.get(id))
    }

    pub fn order_code_taken(&self, code: &OrderCode) -> bool {
        self.order_codes.contains_key(code)
    }

    pub fn ping(&self, id: Uuid) -> Option<&LocationPing> {
        self.pings.get(&id)
    }

    pub fn pings(&self) -> Vec<LocationPing> {
        sorted_pings(self.pings.values())
    }

    pub fn pings_for_delivery(&self, delivery_id: Uuid) -> Vec<LocationPing> {
        sorted_pings(
            self.pings
                .values()
                .filter(|p| p.delivery_id == Some(delivery_id)),
        )
    }

    pub fn pings_for_driver(&self, driver_id: Uuid) -> Vec<LocationPing> {
        sorted_pings(self.pings.values().filter(|p| p.driver_id == Some(driver_id)))
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.len()
    }

    pub fn ping_count(&self) -> usize {
        self.pings.len()
    }
}

fn sorted_deliveries<'a>(deliveries: impl Iterator<Item = &'a Delivery>) -> Vec<Delivery> {
    let mut deliveries: Vec<Delivery> = deliveries.cloned().collect();
    deliveries.sort_by_key(|d| (d.created_at, d.id));
    deliveries
}

fn sorted_pings<'a>(pings: impl Iterator<Item = &'a LocationPing>) -> Vec<LocationPing> {
    let mut pings: Vec<LocationPing> = pings.cloned().collect();
    pings.sort_by_key(|p| (p.observed_at, p.created_at, p.id));
    pings
}

#[derive(Debug, Default)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    pub fn begin(&self) -> Result<Transaction<'_>, StoreError> {
        let tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        Ok(Transaction {
            tables,
            undo: Vec::new(),
            committed: false,
        })
    }
}

enum Undo {
    Driver(Uuid, Option<Driver>),
    Delivery(Uuid, Option<Delivery>),
    Ping(Uuid, Option<LocationPing>),
    OrderCode(OrderCode, Option<Uuid>),
}

pub struct Transaction<'a> {
    tables: RwLockWriteGuard<'a, Tables>,
    undo: Vec<Undo>,
    committed: bool,
}

impl Deref for Transaction<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.tables
    }
}

impl Transaction<'_> {
    pub fn insert_driver(&mut self, driver: Driver) -> Result<Driver, StoreError> {
        if self.tables.drivers.contains_key(&driver.id) {
            return Err(StoreError::UniqueViolation {
                column: "drivers.id",
                value: driver.id.to_string(),
            });
        }

        let previous = self.tables.drivers.insert(driver.id, driver.clone());
        self.undo.push(Undo::Driver(driver.id, previous));
        Ok(driver)
    }

    pub fn update_driver(&mut self, mut driver: Driver) -> Result<Driver, StoreError> {
        let existing = self
            .tables
            .drivers
            .get(&driver.id)
            .ok_or(StoreError::RowNotFound {
                table: "drivers",
                id: driver.id,
            })?;

        driver.created_at = existing.created_at;
        driver.updated_at = Utc::now();

        let previous = self.tables.drivers.insert(driver.id, driver.clone());
        self.undo.push(Undo::Driver(driver.id, previous));
        Ok(driver)
    }

    /// Removes a driver together with their deliveries. Refused while any
    /// ping references the driver or one of those deliveries.
    pub fn delete_driver(&mut self, id: Uuid) -> Result<usize, StoreError> {
        if !self.tables.drivers.contains_key(&id) {
            return Err(StoreError::RowNotFound { table: "drivers", id });
        }

        let delivery_ids: Vec<Uuid> = self.tables.deliveries_of_driver(id).map(|d| d.id).collect();
        let dependents = self
            .tables
            .pings
            .values()
            .filter(|p| {
                p.driver_id == Some(id)
                    || p.delivery_id.is_some_and(|delivery_id| delivery_ids.contains(&delivery_id))
            })
            .count();

        if dependents > 0 {
            return Err(StoreError::Restricted {
                table: "drivers",
                id,
                dependent_table: "location_pings",
                dependents,
            });
        }

        for delivery_id in &delivery_ids {
            let previous = self.tables.deliveries.remove(delivery_id);
            self.undo.push(Undo::Delivery(*delivery_id, previous));
        }

        let previous = self.tables.drivers.remove(&id);
        self.undo.push(Undo::Driver(id, previous));
        Ok(delivery_ids.len())
    }

    pub fn insert_delivery(&mut self, delivery: Delivery) -> Result<Delivery, StoreError> {
        if self.tables.deliveries.contains_key(&delivery.id) {
            return Err(StoreError::UniqueViolation {
                column: "deliveries.id",
                value: delivery.id.to_string(),
            });
        }

        self.require_driver("deliveries", delivery.id, delivery.driver_id)?;

        if self.tables.order_codes.contains_key(&delivery.order_code) {
            return Err(StoreError::UniqueViolation {
                column: "order_code",
                value: delivery.order_code.to_string(),
            });
        }

        let previous_code = self
            .tables
            .order_codes
            .insert(delivery.order_code.clone(), delivery.id);
        self.undo
            .push(Undo::OrderCode(delivery.order_code.clone(), previous_code));

        let previous = self.tables.deliveries.insert(delivery.id, delivery.clone());
        self.undo.push(Undo::Delivery(delivery.id, previous));
        Ok(delivery)
    }

    pub fn update_delivery(&mut self, mut delivery: Delivery) -> Result<Delivery, StoreError> {
        let existing = self
            .tables
            .deliveries
            .get(&delivery.id)
            .ok_or(StoreError::RowNotFound {
                table: "deliveries",
                id: delivery.id,
            })?;

        if existing.order_code != delivery.order_code {
            return Err(StoreError::ImmutableColumn {
                column: "order_code",
            });
        }

        let driver_changed = existing.driver_id != delivery.driver_id;
        delivery.created_at = existing.created_at;

        if driver_changed {
            self.require_driver("deliveries", delivery.id, delivery.driver_id)?;
        }

        delivery.updated_at = Utc::now();
        let previous = self.tables.deliveries.insert(delivery.id, delivery.clone());
        self.undo.push(Undo::Delivery(delivery.id, previous));
        Ok(delivery)
    }

    /// Removes a delivery. Referencing pings block the delete unless
    /// `cascade` is set, in which case they are removed too.
    pub fn delete_delivery(&mut self, id: Uuid, cascade: bool) -> Result<usize, StoreError> {
        if !self.tables.deliveries.contains_key(&id) {
            return Err(StoreError::RowNotFound {
                table: "deliveries",
                id,
            });
        }

        let ping_ids: Vec<Uuid> = self
            .tables
            .pings
            .values()
            .filter(|p| p.delivery_id == Some(id))
            .map(|p| p.id)
            .collect();

        if !ping_ids.is_empty() && !cascade {
            return Err(StoreError::Restricted {
                table: "deliveries",
                id,
                dependent_table: "location_pings",
                dependents: ping_ids.len(),
            });
        }

        for ping_id in &ping_ids {
            let previous = self.tables.pings.remove(ping_id);
            self.undo.push(Undo::Ping(*ping_id, previous));
        }

        let previous = self.tables.deliveries.remove(&id);
        self.undo.push(Undo::Delivery(id, previous));
        Ok(ping_ids.len())
    }

    pub fn insert_ping(&mut self, ping: LocationPing) -> Result<LocationPing, StoreError> {
        if self.tables.pings.contains_key(&ping.id) {
            return Err(StoreError::UniqueViolation {
                column: "location_pings.id",
                value: ping.id.to_string(),
            });
        }

        self.require_ping_refs(&ping)?;

        let previous = self.tables.pings.insert(ping.id, ping.clone());
        self.undo.push(Undo::Ping(ping.id, previous));
        Ok(ping)
    }

    pub fn update_ping(&mut self, mut ping: LocationPing) -> Result<LocationPing, StoreError> {
        let existing = self.tables.pings.get(&ping.id).ok_or(StoreError::RowNotFound {
            table: "location_pings",
            id: ping.id,
        })?;

        ping.created_at = existing.created_at;
        self.require_ping_refs(&ping)?;

        ping.updated_at = Utc::now();
        let previous = self.tables.pings.insert(ping.id, ping.clone());
        self.undo.push(Undo::Ping(ping.id, previous));
        Ok(ping)
    }

    pub fn delete_ping(&mut self, id: Uuid) -> Result<(), StoreError> {
        let previous = self.tables.pings.remove(&id).ok_or(StoreError::RowNotFound {
            table: "location_pings",
            id,
        })?;

        self.undo.push(Undo::Ping(id, Some(previous)));
        Ok(())
    }

    pub fn commit(mut self) {
        self.committed = true;
        self.undo.clear();
    }

    fn require_driver(&self, table: &'static str, id: Uuid, driver_id: Uuid) -> Result<(), StoreError> {
        if self.tables.drivers.contains_key(&driver_id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKeyViolation {
                table,
                id,
                referenced: "drivers",
            })
        }
    }

    fn require_ping_refs(&self, ping: &LocationPing) -> Result<(), StoreError> {
        if let Some(driver_id) = ping.driver_id {
            self.require_driver("location_pings", ping.id, driver_id)?;
        }

        match ping.delivery_id {
            Some(delivery_id) if !self.tables.deliveries.contains_key(&delivery_id) => {
                Err(StoreError::ForeignKeyViolation {
                    table: "location_pings",
                    id: ping.id,
                    referenced: "deliveries",
                })
            }
            _ => Ok(()),
        }
    }

    fn rollback(&mut self) {
        let ops = self.undo.len();
        while let Some(entry) = self.undo.pop() {
            let tables = &mut *self.tables;
            match entry {
                Undo::Driver(id, previous) => restore(&mut tables.drivers, id, previous),
                Undo::Delivery(id, previous) => restore(&mut tables.deliveries, id, previous),
                Undo::Ping(id, previous) => restore(&mut tables.pings, id, previous),
                Undo::OrderCode(code, previous) => restore(&mut tables.order_codes, code, previous),
            }
        }

        if ops > 0 {
            debug!(ops, "transaction rolled back");
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}

fn restore<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}
