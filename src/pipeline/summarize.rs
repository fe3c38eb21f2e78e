use std::collections::BTreeMap;

use crate::record::{DamageKind, DetectionRecord};

// Returns <category, record count>, one entry per category in class order
pub type DetectionSummary = BTreeMap<DamageKind, u32>;

pub fn summarize_records(records: &[DetectionRecord]) -> DetectionSummary {
    let mut summary: DetectionSummary = DamageKind::all().iter().map(|kind| (*kind, 0)).collect();
    for record in records {
        *summary.entry(record.kind).or_insert(0) += 1;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Origin;

    #[test]
    fn test_summary() {
        let records = vec![
            DetectionRecord::new(DamageKind::FenderDent, 0.9, Origin::LiveFeed),
            DetectionRecord::new(DamageKind::FenderDent, 0.4, Origin::LiveFeed),
            DetectionRecord::new(DamageKind::RoofDent, 0.5, Origin::LiveFeed),
        ];
        let summary = summarize_records(&records);
        assert_eq!(summary.len(), 17); // always every category
        assert_eq!(summary[&DamageKind::FenderDent], 2);
        assert_eq!(summary[&DamageKind::RoofDent], 1);
        assert_eq!(summary[&DamageKind::BootDent], 0);
        assert_eq!(summary.keys().next(), Some(&DamageKind::BodypanelDent));
    }
}
