//! Fallback rate table parsed from a flat list-of-maps config.

use super::{parse_row, ConfigLevel, RateTable, RateTableError};
use crate::domain::Region;
use std::collections::HashMap;

/// Regions the default table must cover for it to be usable at all.
pub const DEFAULT_TABLE_REGIONS: [&str; 8] = ["PH", "TH", "SG", "MY", "VN", "ID", "TW", "BR"];

/// Default hidden-fee brackets per affiliate region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRateTable {
    by_region: HashMap<Region, RateTable>,
}

impl DefaultRateTable {
    /// Parse rows carrying a `region` column plus the bracket columns.
    ///
    /// Fails if any region in [`DEFAULT_TABLE_REGIONS`] has no rows; a partial
    /// default table is never returned.
    pub fn parse(rows: &[HashMap<String, String>]) -> Result<Self, RateTableError> {
        let mut grouped: HashMap<Region, Vec<_>> = HashMap::new();
        for (idx, row) in rows.iter().enumerate() {
            let region = row
                .get("region")
                .map(|r| Region::new(r.as_str()))
                .filter(|r| !r.is_empty())
                .ok_or(RateTableError::MissingField {
                    row: idx,
                    field: "region",
                })?;
            let key = format!("default:{}", region);
            let conf = parse_row(idx, row, &key, ConfigLevel::Default)?;
            grouped.entry(region).or_default().push(conf);
        }

        let missing: Vec<String> = DEFAULT_TABLE_REGIONS
            .iter()
            .filter(|r| !grouped.contains_key(&Region::new(**r)))
            .map(|r| r.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(RateTableError::MissingRegions(missing));
        }

        let by_region = grouped
            .into_iter()
            .map(|(region, rows)| {
                let key = format!("default:{}", region);
                (region, RateTable::new(key, rows))
            })
            .collect();

        Ok(Self { by_region })
    }

    pub fn table(&self, region: &Region) -> Option<&RateTable> {
        self.by_region.get(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::numeric::gram_to_db_weight;
    use crate::domain::Decimal;
    use crate::ratetable::test_support::config_row;

    fn region_row(region: &str, weight_range: &str, start_price: &str) -> HashMap<String, String> {
        let mut row = config_row(weight_range, start_price, "0", "0", "0", "1", "0");
        row.insert("region".to_string(), region.to_string());
        row
    }

    fn full_rows() -> Vec<HashMap<String, String>> {
        DEFAULT_TABLE_REGIONS
            .iter()
            .flat_map(|r| vec![region_row(r, "INF", "5"), region_row(r, "1000", "2")])
            .collect()
    }

    #[test]
    fn test_parse_full_table() {
        let table = DefaultRateTable::parse(&full_rows()).unwrap();
        let sg = table.table(&Region::new("SG")).unwrap();
        assert_eq!(sg.rows().len(), 2);
        assert_eq!(sg.key(), "default:SG");
        let row = sg.select(gram_to_db_weight(Decimal::from(800))).unwrap();
        assert_eq!(row.start_price, Decimal::from(2));
        assert_eq!(row.level, ConfigLevel::Default);
    }

    #[test]
    fn test_missing_region_rejects_whole_table() {
        let rows: Vec<_> = full_rows()
            .into_iter()
            .filter(|r| r.get("region").map(String::as_str) != Some("BR"))
            .collect();
        let err = DefaultRateTable::parse(&rows).unwrap_err();
        assert_eq!(err, RateTableError::MissingRegions(vec!["BR".to_string()]));
    }

    #[test]
    fn test_extra_regions_are_kept() {
        let mut rows = full_rows();
        rows.push(region_row("MX", "inf", "8"));
        let table = DefaultRateTable::parse(&rows).unwrap();
        assert!(table.table(&Region::new("MX")).is_some());
    }

    #[test]
    fn test_row_without_region_is_an_error() {
        let mut rows = full_rows();
        rows.push(config_row("inf", "1", "0", "0", "0", "1", "0"));
        assert!(matches!(
            DefaultRateTable::parse(&rows),
            Err(RateTableError::MissingField { field: "region", .. })
        ));
    }
}
