//! ClassifiedArticle -> ArticleRecord: description extraction, coordinate
//! parsing, and the typed lifting of infobox values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tome_types::{
    truncate_description, ArticleRecord, ClassifiedArticle, Infobox, InfoboxValue,
};

/// Infobox keys whose values are lifted to integers. Dates deliberately
/// stay strings to preserve the dump's original formatting.
const INTEGER_KEYS: &[&str] = &["population", "population_total", "elevation_m", "area_km2"];

pub fn build_record(classified: &ClassifiedArticle) -> ArticleRecord {
    let article = &classified.article;
    let first_paragraph = article
        .plaintext
        .split("\n\n")
        .next()
        .unwrap_or_default();
    let infobox = article.infoboxes.first();
    let coords = infobox.and_then(extract_coordinates);

    ArticleRecord {
        id: article.id.to_string(),
        article_type: classified.article_type,
        title: article.title.clone(),
        description: truncate_description(first_paragraph),
        wikidata_id: infobox.and_then(extract_wikidata_id),
        coords_lat: coords.map(|(lat, _)| lat),
        coords_lon: coords.map(|(_, lon)| lon),
        infobox: infobox.map(lift_infobox),
        content: article.plaintext.clone(),
        updated_at: parse_timestamp(&article.timestamp),
        embedding: None,
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn extract_wikidata_id(infobox: &Infobox) -> Option<String> {
    for key in ["wikidata", "wikidata_id"] {
        if let Some(value) = infobox.fields.get(key) {
            if !value.is_empty() {
                return Some(value.clone());
            }
        }
    }
    None
}

/// Accepts `"35.67, 139.65"`, `"35.67 N 139.65 E"` (the flattened coord
/// template), or separate latitude/longitude fields.
fn extract_coordinates(infobox: &Infobox) -> Option<(f32, f32)> {
    for key in ["coordinates", "coords", "coord"] {
        if let Some(value) = infobox.fields.get(key) {
            if let Some(pair) = parse_coordinate_pair(value) {
                return Some(pair);
            }
        }
    }
    let lat = lookup_float(infobox, &["latitude", "lat_d", "lat"])?;
    let lon = lookup_float(infobox, &["longitude", "long_d", "lon", "long"])?;
    Some((lat, lon))
}

fn lookup_float(infobox: &Infobox, keys: &[&str]) -> Option<f32> {
    keys.iter()
        .find_map(|key| infobox.fields.get(*key))
        .and_then(|value| value.trim().parse().ok())
}

fn parse_coordinate_pair(value: &str) -> Option<(f32, f32)> {
    if let Some((lat, lon)) = value.split_once(',') {
        if let (Ok(lat), Ok(lon)) = (lat.trim().parse(), lon.trim().parse()) {
            return Some((lat, lon));
        }
    }
    // Flattened "{{coord|35.67|N|139.65|E}}" becomes "35.67 N 139.65 E".
    let tokens: Vec<&str> = value.split_whitespace().collect();
    let mut numbers: Vec<f32> = Vec::new();
    let mut signs: Vec<f32> = Vec::new();
    for token in &tokens {
        if let Ok(number) = token.parse::<f32>() {
            numbers.push(number);
            signs.push(1.0);
        } else {
            match token.to_ascii_uppercase().as_str() {
                "S" | "W" => {
                    if let Some(sign) = signs.last_mut() {
                        *sign = -1.0;
                    }
                }
                "N" | "E" => {}
                _ => return None,
            }
        }
    }
    if numbers.len() == 2 {
        return Some((numbers[0] * signs[0], numbers[1] * signs[1]));
    }
    None
}

fn lift_infobox(infobox: &Infobox) -> BTreeMap<String, InfoboxValue> {
    infobox
        .fields
        .iter()
        .map(|(key, value)| {
            let lifted = if INTEGER_KEYS.contains(&key.as_str()) {
                value
                    .replace(',', "")
                    .trim()
                    .parse::<i64>()
                    .map(InfoboxValue::Integer)
                    .unwrap_or_else(|_| InfoboxValue::Text(value.clone()))
            } else {
                InfoboxValue::Text(value.clone())
            };
            (key.clone(), lifted)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tome_types::{ArticleType, ParsedArticle, RawPage};

    fn classified(infobox: Infobox, plaintext: &str) -> ClassifiedArticle {
        let mut article = ParsedArticle::from_raw(RawPage {
            title: "Tokyo".to_string(),
            id: 2,
            namespace: 0,
            wikitext: String::new(),
            timestamp: "2024-05-01T12:00:00Z".to_string(),
            redirect: None,
        });
        article.plaintext = plaintext.to_string();
        article.infoboxes = vec![infobox];
        ClassifiedArticle {
            article,
            article_type: ArticleType::Place,
        }
    }

    fn infobox(fields: &[(&str, &str)]) -> Infobox {
        Infobox {
            kind: "settlement".to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn coordinates_parse_from_decimal_pair() {
        let record = build_record(&classified(
            infobox(&[("coordinates", "35.6762, 139.6503")]),
            "Capital of Japan.",
        ));
        assert!((record.coords_lat.unwrap() - 35.6762).abs() < 1e-4);
        assert!((record.coords_lon.unwrap() - 139.6503).abs() < 1e-4);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn coordinates_parse_from_hemisphere_tokens() {
        let record = build_record(&classified(
            infobox(&[("coordinates", "33.86 S 151.21 E")]),
            "Sydney.",
        ));
        assert!((record.coords_lat.unwrap() + 33.86).abs() < 1e-4);
        assert!((record.coords_lon.unwrap() - 151.21).abs() < 1e-4);
    }

    #[test]
    fn missing_coordinates_leave_both_null() {
        let record = build_record(&classified(infobox(&[("name", "Tokyo")]), "Text."));
        assert_eq!(record.coords_lat, None);
        assert_eq!(record.coords_lon, None);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn population_lifts_to_integer_and_dates_stay_strings() {
        let record = build_record(&classified(
            infobox(&[("population", "37,400,068"), ("founded", "1457")]),
            "Text.",
        ));
        let map = record.infobox.unwrap();
        assert_eq!(map["population"], InfoboxValue::Integer(37_400_068));
        assert_eq!(map["founded"], InfoboxValue::Text("1457".to_string()));
    }

    #[test]
    fn description_is_first_paragraph() {
        let record = build_record(&classified(
            infobox(&[]),
            "First paragraph here.\n\nSecond paragraph.",
        ));
        assert_eq!(record.description, "First paragraph here.");
        assert!(record.content.contains("Second paragraph."));
    }

    #[test]
    fn timestamp_parses_to_utc() {
        let record = build_record(&classified(infobox(&[]), "Text."));
        assert_eq!(record.updated_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }
}
