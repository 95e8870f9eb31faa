//! Zone geography: zone -> intermediate group -> region
//!
//! Groups are defined by inclusive ranges of planning-district (PD) codes,
//! numbered from 1 in configuration order. A zone whose district matches no
//! range is rejected; there is no catch-all group.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use tracing::debug;

use crate::config::RangePair;
use crate::error::{PopSynError, Result};
use crate::models::ZoneRecord;

/// Ordered, non-overlapping district ranges
#[derive(Debug, Clone)]
pub struct GeographyGroups {
    ranges: Vec<RangeInclusive<u32>>,
}

impl GeographyGroups {
    pub fn new(pairs: &[RangePair]) -> Result<Self> {
        if pairs.is_empty() {
            return Err(PopSynError::config("PdGroups must define at least one range"));
        }

        let mut ranges: Vec<RangeInclusive<u32>> = Vec::with_capacity(pairs.len());
        for (idx, &[start, end]) in pairs.iter().enumerate() {
            if start > end {
                return Err(PopSynError::config(format!(
                    "PdGroups range {} [{start}, {end}] has start after end",
                    idx + 1
                )));
            }
            if let Some(other) = ranges
                .iter()
                .position(|r| start <= *r.end() && *r.start() <= end)
            {
                return Err(PopSynError::config(format!(
                    "PdGroups range {} [{start}, {end}] overlaps range {}",
                    idx + 1,
                    other + 1
                )));
            }
            ranges.push(start..=end);
        }

        Ok(Self { ranges })
    }

    /// 1-based group index for a district, if any range holds it
    pub fn group_of(&self, district: u32) -> Option<u32> {
        self.ranges
            .iter()
            .position(|r| r.contains(&district))
            .map(|idx| idx as u32 + 1)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Union of inclusive zone ranges, used for internal/external zone sets
#[derive(Debug, Clone)]
pub struct ZoneRanges {
    ranges: Vec<RangeInclusive<u32>>,
}

impl ZoneRanges {
    pub fn new(name: &str, pairs: &[RangePair]) -> Result<Self> {
        let mut ranges = Vec::with_capacity(pairs.len());
        for &[start, end] in pairs {
            if start > end {
                return Err(PopSynError::config(format!(
                    "{name} range [{start}, {end}] has start after end"
                )));
            }
            ranges.push(start..=end);
        }
        Ok(Self { ranges })
    }

    pub fn contains(&self, zone: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(&zone))
    }
}

/// Where a person works relative to the modelled area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmploymentZoneClass {
    Internal,
    External,
    Roaming,
    Unassigned,
    Other,
}

#[derive(Debug, Clone)]
pub struct EmploymentZones {
    internal: ZoneRanges,
    external: ZoneRanges,
    roaming: u32,
}

impl EmploymentZones {
    pub fn new(internal: ZoneRanges, external: ZoneRanges, roaming: u32) -> Self {
        Self {
            internal,
            external,
            roaming,
        }
    }

    pub fn classify(&self, zone: u32) -> EmploymentZoneClass {
        if zone == self.roaming {
            EmploymentZoneClass::Roaming
        } else if zone == 0 {
            EmploymentZoneClass::Unassigned
        } else if self.internal.contains(zone) {
            EmploymentZoneClass::Internal
        } else if self.external.contains(zone) {
            EmploymentZoneClass::External
        } else {
            EmploymentZoneClass::Other
        }
    }
}

/// Geography ancestors of a single zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneInfo {
    pub zone: u32,
    pub district: u32,
    pub group: u32,
}

/// Immutable zone -> group -> region mapping, built once per run
#[derive(Debug, Clone)]
pub struct ZoneHierarchy {
    region: u32,
    zones: BTreeMap<u32, ZoneInfo>,
}

impl ZoneHierarchy {
    /// Build the mapping for every zone inside `internal`. Zone-file rows
    /// outside the internal ranges are skipped.
    pub fn build(
        records: &[ZoneRecord],
        groups: &GeographyGroups,
        internal: &ZoneRanges,
        region: u32,
    ) -> Result<Self> {
        let mut zones = BTreeMap::new();
        let mut skipped = 0usize;

        for record in records {
            if !internal.contains(record.zone) {
                skipped += 1;
                continue;
            }
            let group = groups.group_of(record.district).ok_or_else(|| {
                PopSynError::config(format!(
                    "zone {} has district {} outside every PdGroups range",
                    record.zone, record.district
                ))
            })?;
            let info = ZoneInfo {
                zone: record.zone,
                district: record.district,
                group,
            };
            if zones.insert(record.zone, info).is_some() {
                return Err(PopSynError::config(format!(
                    "zone {} appears more than once in the zone file",
                    record.zone
                )));
            }
        }

        debug!(
            "Zone hierarchy: {} zones in {} groups ({} outside internal ranges)",
            zones.len(),
            groups.len(),
            skipped
        );

        Ok(Self { region, zones })
    }

    pub fn region(&self) -> u32 {
        self.region
    }

    pub fn get(&self, zone: u32) -> Option<&ZoneInfo> {
        self.zones.get(&zone)
    }

    pub fn contains(&self, zone: u32) -> bool {
        self.zones.contains_key(&zone)
    }

    pub fn group_of(&self, zone: u32) -> Option<u32> {
        self.get(zone).map(|info| info.group)
    }

    /// Like `get`, but an unknown zone is an error naming where it came from
    pub fn resolve(&self, zone: u32, origin: &str) -> Result<&ZoneInfo> {
        self.get(zone).ok_or_else(|| PopSynError::UnknownZone {
            zone,
            origin: origin.to_string(),
        })
    }

    /// All zones ordered by (group, zone)
    pub fn zones(&self) -> Vec<ZoneInfo> {
        let mut zones: Vec<ZoneInfo> = self.zones.values().copied().collect();
        zones.sort_by_key(|info| (info.group, info.zone));
        zones
    }

    /// Group ids that hold at least one zone
    pub fn groups(&self) -> BTreeSet<u32> {
        self.zones.values().map(|info| info.group).collect()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(zone: u32, district: u32) -> ZoneRecord {
        ZoneRecord { zone, district }
    }

    fn internal() -> ZoneRanges {
        ZoneRanges::new("ZoneRanges", &[[1, 5999]]).unwrap()
    }

    #[test]
    fn test_groups_are_inclusive_and_one_based() {
        let groups = GeographyGroups::new(&[[1, 1], [2, 5], [6, 46]]).unwrap();
        assert_eq!(groups.group_of(1), Some(1));
        assert_eq!(groups.group_of(2), Some(2));
        assert_eq!(groups.group_of(5), Some(2));
        assert_eq!(groups.group_of(46), Some(3));
        assert_eq!(groups.group_of(47), None);
        assert_eq!(groups.group_of(0), None);
    }

    #[test]
    fn test_overlap_and_inverted_ranges_rejected() {
        assert!(GeographyGroups::new(&[[1, 4], [4, 8]]).is_err());
        assert!(GeographyGroups::new(&[[5, 8], [1, 5]]).is_err());
        assert!(GeographyGroups::new(&[[9, 2]]).is_err());
        assert!(GeographyGroups::new(&[]).is_err());
    }

    #[test]
    fn test_hierarchy_orders_by_group_then_zone() {
        let groups = GeographyGroups::new(&[[1, 1], [2, 3]]).unwrap();
        let records = vec![zone(10, 2), zone(3, 1), zone(7, 3), zone(1, 1)];
        let hierarchy = ZoneHierarchy::build(&records, &groups, &internal(), 1).unwrap();

        let order: Vec<(u32, u32)> = hierarchy.zones().iter().map(|z| (z.group, z.zone)).collect();
        assert_eq!(order, vec![(1, 1), (1, 3), (2, 7), (2, 10)]);
        assert_eq!(hierarchy.groups().into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(hierarchy.region(), 1);
    }

    #[test]
    fn test_unmatched_district_is_configuration_error() {
        let groups = GeographyGroups::new(&[[1, 1]]).unwrap();
        let err = ZoneHierarchy::build(&[zone(1, 1), zone(2, 9)], &groups, &internal(), 1)
            .unwrap_err();
        assert!(matches!(err, PopSynError::Configuration(_)));
    }

    #[test]
    fn test_external_zones_skipped() {
        let groups = GeographyGroups::new(&[[1, 1]]).unwrap();
        // district 0 would not map, but zone 7000 is external and never mapped
        let hierarchy =
            ZoneHierarchy::build(&[zone(1, 1), zone(7000, 0)], &groups, &internal(), 1).unwrap();
        assert_eq!(hierarchy.len(), 1);
        assert!(!hierarchy.contains(7000));
        assert_eq!(hierarchy.get(1).map(|info| info.group), Some(1));
        assert!(hierarchy.get(7000).is_none());
        assert!(matches!(
            hierarchy.resolve(7000, "test"),
            Err(PopSynError::UnknownZone { zone: 7000, .. })
        ));
    }

    #[test]
    fn test_duplicate_zone_rejected() {
        let groups = GeographyGroups::new(&[[1, 2]]).unwrap();
        assert!(ZoneHierarchy::build(&[zone(1, 1), zone(1, 2)], &groups, &internal(), 1).is_err());
    }

    #[test]
    fn test_employment_zone_classes() {
        let zones = EmploymentZones::new(
            internal(),
            ZoneRanges::new("ExternalZoneRanges", &[[6000, 8886]]).unwrap(),
            8888,
        );
        assert_eq!(zones.classify(0), EmploymentZoneClass::Unassigned);
        assert_eq!(zones.classify(42), EmploymentZoneClass::Internal);
        assert_eq!(zones.classify(6500), EmploymentZoneClass::External);
        assert_eq!(zones.classify(8888), EmploymentZoneClass::Roaming);
        assert_eq!(zones.classify(9999), EmploymentZoneClass::Other);
    }
}
