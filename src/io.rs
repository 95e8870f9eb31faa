//! CSV plumbing for zones, seed records, control tables and population vectors

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use crate::controls::{ControlTable, GeoKey, GeographyLevel};
use crate::error::{PopSynError, Result};
use crate::models::ZoneRecord;
use crate::rebalance::PopulationVector;

/// Deserialize every row, returning the header alongside the records
pub fn read_records<T: DeserializeOwned, R: Read>(reader: R) -> Result<(StringRecord, Vec<T>)> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let records = reader.deserialize().collect::<std::result::Result<Vec<T>, _>>()?;
    Ok((headers, records))
}

pub fn read_zones<R: Read>(reader: R) -> Result<Vec<ZoneRecord>> {
    let (_, zones) = read_records(reader)?;
    Ok(zones)
}

pub fn write_records<T: Serialize, W: Write>(records: &[T], writer: W) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_id(value: &str, column: &str, line: usize) -> Result<u32> {
    value
        .parse::<u32>()
        .ok()
        .or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v <= u32::MAX as f64)
                .map(|v| v as u32)
        })
        .ok_or_else(|| {
            PopSynError::config(format!("line {line}: `{column}` value `{value}` is not a zone/group id"))
        })
}

fn parse_value(value: &str, column: &str, line: usize) -> Result<f64> {
    if value.is_empty() {
        return Ok(0.0);
    }
    value.parse::<f64>().map_err(|_| {
        PopSynError::config(format!("line {line}: `{column}` value `{value}` is not numeric"))
    })
}

/// Read a control table written by this tool or by earlier runs of the
/// original tooling. The zone column may be named `zone` or `maz`; a `taz`
/// column is ignored.
pub fn read_control_table<R: Read>(reader: R, level: GeographyLevel) -> Result<ControlTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    let find = |names: &[&str]| headers.iter().position(|h| names.contains(&h));
    let region_idx = find(&["region"])
        .ok_or_else(|| PopSynError::config(format!("{level} control table lacks a `region` column")))?;
    let group_idx = match level {
        GeographyLevel::Region => None,
        _ => Some(find(&["puma"]).ok_or_else(|| {
            PopSynError::config(format!("{level} control table lacks a `puma` column"))
        })?),
    };
    let zone_idx = match level {
        GeographyLevel::Zone => Some(find(&["zone", "maz"]).ok_or_else(|| {
            PopSynError::config("zone control table lacks a `zone` (or `maz`) column")
        })?),
        _ => None,
    };

    let key_like = ["region", "puma", "zone", "maz", "taz"];
    let attributes: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !key_like.contains(h))
        .map(|(idx, h)| (idx, h.to_string()))
        .collect();

    let mut table = ControlTable::new(
        level,
        attributes.iter().map(|(_, name)| name.clone()).collect(),
    );

    for (row_no, record) in reader.records().enumerate() {
        let record = record?;
        let line = row_no + 2;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let region = parse_id(field(region_idx), "region", line)?;
        let key = match (group_idx, zone_idx) {
            (Some(g), Some(z)) => GeoKey::zone(
                region,
                parse_id(field(g), "puma", line)?,
                parse_id(field(z), "zone", line)?,
            ),
            (Some(g), None) => GeoKey::group(region, parse_id(field(g), "puma", line)?),
            _ => GeoKey::region(region),
        };
        let values = attributes
            .iter()
            .map(|(idx, name)| parse_value(field(*idx), name, line))
            .collect::<Result<Vec<f64>>>()?;
        table.push(key, values)?;
    }

    Ok(table)
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

pub fn write_control_table<W: Write>(table: &ControlTable, writer: W) -> Result<()> {
    let level = table.level();
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(writer);

    let header: Vec<&str> = level
        .key_columns()
        .iter()
        .copied()
        .chain(table.columns().iter().map(String::as_str))
        .collect();
    writer.write_record(&header)?;

    for row in table.rows() {
        let mut fields = vec![row.key.region.to_string()];
        if level != GeographyLevel::Region {
            fields.push(row.key.group.unwrap_or_default().to_string());
        }
        if level == GeographyLevel::Zone {
            fields.push(row.key.zone.unwrap_or_default().to_string());
        }
        fields.extend(row.values.iter().map(|v| format_value(*v)));
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

/// Two-column forecast file: zone id, then target population. Header names
/// are not interpreted.
pub fn read_population_vector<R: Read>(reader: R) -> Result<PopulationVector> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    if reader.headers()?.len() < 2 {
        return Err(PopSynError::config(
            "population vector needs a zone column and a population column",
        ));
    }

    let mut pairs = Vec::new();
    for (row_no, record) in reader.records().enumerate() {
        let record = record?;
        let line = row_no + 2;
        let zone = parse_id(record.get(0).unwrap_or(""), "zone", line)?;
        let population = parse_value(record.get(1).unwrap_or(""), "population", line)?;
        pairs.push((zone, population));
    }
    PopulationVector::from_pairs(pairs)
}

pub fn open(path: impl AsRef<Path>) -> Result<File> {
    Ok(File::open(path.as_ref())?)
}

/// Create a file, making parent directories as needed
pub fn create(path: impl AsRef<Path>) -> Result<File> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_zones_accepts_legacy_header() {
        let zones = read_zones("Zone#,PD\n1,1\n2,4\n".as_bytes()).unwrap();
        assert_eq!(zones, vec![ZoneRecord { zone: 1, district: 1 }, ZoneRecord { zone: 2, district: 4 }]);
        let zones = read_zones("Zone,PD\n7,2\n".as_bytes()).unwrap();
        assert_eq!(zones[0].zone, 7);
    }

    #[test]
    fn test_control_table_csv_round_trip() {
        let mut table = ControlTable::new(
            GeographyLevel::Zone,
            vec!["totalhh".to_string(), "totpop".to_string()],
        );
        table.push(GeoKey::zone(1, 2, 14), vec![12.0, 30.0]).unwrap();
        table.push(GeoKey::zone(1, 2, 15), vec![0.0, 2.5]).unwrap();

        let mut buf = Vec::new();
        write_control_table(&table, &mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert_eq!(text, "region,puma,zone,totalhh,totpop\n1,2,14,12,30\n1,2,15,0,2.5\n");

        let read = read_control_table(buf.as_slice(), GeographyLevel::Zone).unwrap();
        assert_eq!(read, table);
    }

    #[test]
    fn test_legacy_maz_layout() {
        let csv = "region,puma,taz,maz,totalhh,totpop\n1,3,101,101,5,12\n";
        let table = read_control_table(csv.as_bytes(), GeographyLevel::Zone).unwrap();
        assert_eq!(table.columns(), &["totalhh".to_string(), "totpop".to_string()]);
        assert_eq!(table.value(&GeoKey::zone(1, 3, 101), "totpop"), Some(12.0));
    }

    #[test]
    fn test_missing_key_column_rejected() {
        let csv = "region,totpop\n1,12\n";
        assert!(matches!(
            read_control_table(csv.as_bytes(), GeographyLevel::Group),
            Err(PopSynError::Configuration(_))
        ));
    }

    #[test]
    fn test_population_vector() {
        let csv = "zone,Population\n1,150\n4,0\n9,12.5\n";
        let vector = read_population_vector(csv.as_bytes()).unwrap();
        assert_eq!(vector.get(1), Some(150.0));
        assert_eq!(vector.get(4), Some(0.0));
        assert_eq!(vector.get(2), None);
        assert_eq!(vector.len(), 3);

        let dup = "zone,Population\n1,150\n1,10\n";
        assert!(read_population_vector(dup.as_bytes()).is_err());
    }
}
