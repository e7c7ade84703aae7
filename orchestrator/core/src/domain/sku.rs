// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! SKU Capacity Table
//!
//! Each AMLFS SKU grows in fixed increments (measured in TiB) up to a SKU
//! specific maximum. Requested volume sizes are rounded up to the next legal
//! capacity before anything is sent to the backend.

use crate::domain::errors::ProvisioningError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TIB: i64 = 1 << 40;

/// Size used when the caller does not request a capacity.
pub const DEFAULT_SIZE_BYTES: i64 = 4 * TIB;

/// Increment applied when no SKU is named (static volumes).
pub const DEFAULT_INCREMENT_BYTES: i64 = 4 * TIB;

/// Resource type of AMLFS entries in the SKU catalog.
pub const AMLFS_SKU_RESOURCE_TYPE: &str = "amlFilesystems";
pub const SKU_CAPACITY_INCREMENT_CAPABILITY: &str = "OSS capacity increment (TiB)";
pub const SKU_CAPACITY_MAXIMUM_CAPABILITY: &str = "default maximum capacity (TiB)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuCapacityEntry {
    pub increment_tib: i64,
    pub maximum_tib: i64,
}

impl SkuCapacityEntry {
    pub fn new(increment_tib: i64, maximum_tib: i64) -> Self {
        Self {
            increment_tib,
            maximum_tib,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkuCapacityTable {
    entries: BTreeMap<String, SkuCapacityEntry>,
}

impl SkuCapacityTable {
    /// Built-in values used until (or instead of) a catalog refresh.
    pub fn defaults() -> Self {
        Self::from_entries([
            ("AMLFS-Durable-Premium-40", SkuCapacityEntry::new(48, 768)),
            ("AMLFS-Durable-Premium-125", SkuCapacityEntry::new(16, 128)),
            ("AMLFS-Durable-Premium-250", SkuCapacityEntry::new(8, 128)),
            ("AMLFS-Durable-Premium-500", SkuCapacityEntry::new(4, 128)),
        ])
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, SkuCapacityEntry)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, entry)| (name.into(), entry))
                .collect(),
        }
    }

    pub fn insert(&mut self, sku_name: impl Into<String>, entry: SkuCapacityEntry) {
        self.entries.insert(sku_name.into(), entry);
    }

    pub fn get(&self, sku_name: &str) -> Option<&SkuCapacityEntry> {
        self.entries.get(sku_name)
    }

    pub fn sku_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Round `requested_bytes` up to the next capacity legal for `sku_name`.
    ///
    /// A zero request means "use the default size". An empty SKU name rounds to
    /// the default increment with no upper bound; an unknown SKU is rejected.
    pub fn round_up_to_increment(
        &self,
        requested_bytes: i64,
        sku_name: &str,
    ) -> Result<i64, ProvisioningError> {
        if requested_bytes < 0 {
            return Err(ProvisioningError::invalid_argument(format!(
                "requested capacity {} must not be negative",
                requested_bytes
            )));
        }
        let requested_bytes = if requested_bytes == 0 {
            DEFAULT_SIZE_BYTES
        } else {
            requested_bytes
        };

        let (increment_bytes, maximum_bytes) = if sku_name.is_empty() {
            (DEFAULT_INCREMENT_BYTES, None)
        } else {
            let entry = self.get(sku_name).ok_or_else(|| {
                ProvisioningError::invalid_argument(format!(
                    "CreateVolume Parameter sku-name must be one of: {:?}",
                    self.sku_names()
                ))
            })?;
            let increment = tib_to_bytes(entry.increment_tib, sku_name)?;
            let maximum = tib_to_bytes(entry.maximum_tib, sku_name)?;
            (increment, Some(maximum))
        };

        if increment_bytes <= 0 {
            return Err(ProvisioningError::internal(format!(
                "SKU {} has a non-positive capacity increment",
                sku_name
            )));
        }

        let blocks = requested_bytes / increment_bytes
            + i64::from(requested_bytes % increment_bytes != 0);
        let rounded = blocks.checked_mul(increment_bytes).ok_or_else(|| {
            ProvisioningError::resource_exhausted(format!(
                "Requested capacity {} cannot be rounded to a multiple of {} bytes for SKU {:?} without overflowing",
                requested_bytes, increment_bytes, sku_name
            ))
        })?;

        if let Some(maximum_bytes) = maximum_bytes {
            if rounded > maximum_bytes {
                return Err(ProvisioningError::resource_exhausted(format!(
                    "Requested capacity {} exceeds maximum capacity {} for SKU {}",
                    rounded, maximum_bytes, sku_name
                )));
            }
        }

        Ok(rounded)
    }
}

fn tib_to_bytes(tib: i64, sku_name: &str) -> Result<i64, ProvisioningError> {
    tib.checked_mul(TIB).ok_or_else(|| {
        ProvisioningError::resource_exhausted(format!(
            "capacity of {} TiB for SKU {} overflows",
            tib, sku_name
        ))
    })
}

/// Convert a rounded byte count to the TiB figure the backend expects.
pub fn bytes_to_tib(bytes: i64) -> f64 {
    bytes as f64 / TIB as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::Code;

    const SKU: &str = "AMLFS-Durable-Premium-125";
    const INCREMENT: i64 = 16 * TIB;
    const MAXIMUM: i64 = 128 * TIB;

    #[test]
    fn test_rounds_around_increment_boundary() {
        let table = SkuCapacityTable::defaults();
        assert_eq!(table.round_up_to_increment(INCREMENT - 1, SKU).unwrap(), INCREMENT);
        assert_eq!(table.round_up_to_increment(INCREMENT, SKU).unwrap(), INCREMENT);
        assert_eq!(
            table.round_up_to_increment(INCREMENT + 1, SKU).unwrap(),
            2 * INCREMENT
        );
        assert_eq!(table.round_up_to_increment(1, SKU).unwrap(), INCREMENT);
    }

    #[test]
    fn test_rounding_is_idempotent() {
        let table = SkuCapacityTable::defaults();
        for requested in [1, 5 * TIB, 17 * TIB, 100 * TIB] {
            let once = table.round_up_to_increment(requested, SKU).unwrap();
            let twice = table.round_up_to_increment(once, SKU).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_zero_uses_default_size() {
        let table = SkuCapacityTable::defaults();
        assert_eq!(table.round_up_to_increment(0, "").unwrap(), DEFAULT_SIZE_BYTES);
        assert_eq!(
            table.round_up_to_increment(0, "AMLFS-Durable-Premium-40").unwrap(),
            48 * TIB
        );
    }

    #[test]
    fn test_over_maximum_is_resource_exhausted() {
        let table = SkuCapacityTable::defaults();
        assert_eq!(table.round_up_to_increment(MAXIMUM, SKU).unwrap(), MAXIMUM);
        let err = table.round_up_to_increment(MAXIMUM + 1, SKU).unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
        assert!(err.message().contains(SKU));
    }

    #[test]
    fn test_max_representable_request_fails() {
        let table = SkuCapacityTable::defaults();
        let err = table.round_up_to_increment(i64::MAX, SKU).unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);

        // No maximum for the empty SKU, so only the overflow check stops it.
        let err = table.round_up_to_increment(i64::MAX, "").unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
    }

    #[test]
    fn test_unknown_sku_lists_known_names() {
        let table = SkuCapacityTable::defaults();
        let err = table.round_up_to_increment(TIB, "AMLFS-Imaginary").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert!(err.message().contains("AMLFS-Durable-Premium-500"));
    }

    #[test]
    fn test_empty_sku_uses_default_increment() {
        let table = SkuCapacityTable::defaults();
        assert_eq!(
            table.round_up_to_increment(5 * TIB, "").unwrap(),
            2 * DEFAULT_INCREMENT_BYTES
        );
        assert_eq!(bytes_to_tib(8 * TIB), 8.0);
    }
}
