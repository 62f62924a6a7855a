//! Search criteria of a filter and partial updates to them.
//!
//! The serialized key names match the stored filter records (`name_car`,
//! `url`, `typengines`, ...). Unknown keys are rejected.

use classifieds_parser::SearchQuery;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Search criteria of a filter. Every facet is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterCriteria {
    /// Brand display name, e.g. "Toyota".
    #[serde(rename = "name_car", default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    /// Brand category page on the site.
    #[serde(rename = "url", default, skip_serializing_if = "Option::is_none")]
    pub brand_url: Option<String>,
    /// Model display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Model labels submitted to the search form.
    #[serde(
        default,
        deserialize_with = "de::one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub models: Vec<String>,
    #[serde(
        default,
        deserialize_with = "de::lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_year: Option<u16>,
    #[serde(
        default,
        deserialize_with = "de::lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_year: Option<u16>,
    #[serde(
        default,
        deserialize_with = "de::lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_price: Option<u32>,
    #[serde(
        default,
        deserialize_with = "de::lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_price: Option<u32>,
    /// Engine displacement label in litres, e.g. "1.6".
    #[serde(
        default,
        deserialize_with = "de::lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_displacement: Option<String>,
    #[serde(
        default,
        deserialize_with = "de::lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_displacement: Option<String>,
    #[serde(
        rename = "typengines",
        default,
        deserialize_with = "de::one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub engine_types: Vec<String>,
    #[serde(
        default,
        deserialize_with = "de::one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub gearbox: Vec<String>,
    #[serde(
        rename = "bodytypes",
        default,
        deserialize_with = "de::one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub body_types: Vec<String>,
    #[serde(
        alias = "checkup",
        default,
        deserialize_with = "de::one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub inspection: Vec<String>,
}

impl FilterCriteria {
    /// Criteria for a whole brand category.
    pub fn brand(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            brand: Some(name.into()),
            brand_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// True when no facet is set at all.
    pub fn is_empty(&self) -> bool {
        self.brand.is_none()
            && self.brand_url.is_none()
            && self.model.is_none()
            && self.models.is_empty()
            && self.min_year.is_none()
            && self.max_year.is_none()
            && self.min_price.is_none()
            && self.max_price.is_none()
            && self.min_displacement.is_none()
            && self.max_displacement.is_none()
            && self.engine_types.is_empty()
            && self.gearbox.is_empty()
            && self.body_types.is_empty()
            && self.inspection.is_empty()
    }

    /// Check that the criteria can be searched.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::validation("filter has no criteria"));
        }

        let Some(url) = self.brand_url.as_deref() else {
            return Err(Error::validation("filter has no brand category url"));
        };
        url::Url::parse(url)
            .map_err(|e| Error::validation(format!("invalid brand category url {url}: {e}")))?;

        check_bounds("year", self.min_year, self.max_year)?;
        check_bounds("price", self.min_price, self.max_price)?;

        let displacement = |v: &Option<String>| -> Result<Option<f64>> {
            v.as_deref()
                .map(|s| {
                    s.trim()
                        .parse::<f64>()
                        .map_err(|_| Error::validation(format!("invalid displacement: {s}")))
                })
                .transpose()
        };
        if let (Some(min), Some(max)) = (
            displacement(&self.min_displacement)?,
            displacement(&self.max_displacement)?,
        ) && min > max
        {
            return Err(Error::validation(format!(
                "displacement bounds inverted: {min} > {max}"
            )));
        }

        Ok(())
    }

    /// Model labels to search for.
    pub fn search_models(&self) -> Vec<String> {
        if !self.models.is_empty() {
            self.models.clone()
        } else {
            self.model.iter().cloned().collect()
        }
    }

    /// Translate into the site's search form labels.
    pub fn search_query(&self) -> SearchQuery {
        SearchQuery {
            models: self.search_models(),
            min_year: self.min_year.map(|y| y.to_string()),
            max_year: self.max_year.map(|y| y.to_string()),
            min_displacement: self.min_displacement.clone(),
            max_displacement: self.max_displacement.clone(),
            engine_types: self.engine_types.clone(),
            gearbox: self.gearbox.clone(),
            body_types: self.body_types.clone(),
            inspection: self.inspection.clone(),
            min_price: self.min_price.map(|p| p.to_string()),
            max_price: self.max_price.map(|p| p.to_string()),
        }
    }

    /// Short human-readable description.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        let name = [self.brand.as_deref(), self.model.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !name.is_empty() {
            parts.push(name);
        }
        if let Some(range) = range_label(self.min_year, self.max_year) {
            parts.push(range);
        }
        if let Some(range) = range_label(self.min_price, self.max_price) {
            parts.push(format!("{range} EUR"));
        }
        if let Some(range) = range_label(
            self.min_displacement.as_deref(),
            self.max_displacement.as_deref(),
        ) {
            parts.push(format!("{range} l"));
        }
        for list in [
            &self.engine_types,
            &self.gearbox,
            &self.body_types,
            &self.inspection,
        ] {
            if !list.is_empty() {
                parts.push(list.join("/"));
            }
        }

        if parts.is_empty() {
            "any".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Apply a partial update. Returns `true` if anything changed.
    pub fn apply(&mut self, patch: &CriteriaPatch) -> bool {
        let before = self.clone();

        apply_field(&mut self.brand, &patch.brand);
        apply_field(&mut self.brand_url, &patch.brand_url);
        apply_field(&mut self.model, &patch.model);
        apply_list(&mut self.models, &patch.models);
        apply_field(&mut self.min_year, &patch.min_year);
        apply_field(&mut self.max_year, &patch.max_year);
        apply_field(&mut self.min_price, &patch.min_price);
        apply_field(&mut self.max_price, &patch.max_price);
        apply_field(&mut self.min_displacement, &patch.min_displacement);
        apply_field(&mut self.max_displacement, &patch.max_displacement);
        apply_list(&mut self.engine_types, &patch.engine_types);
        apply_list(&mut self.gearbox, &patch.gearbox);
        apply_list(&mut self.body_types, &patch.body_types);
        apply_list(&mut self.inspection, &patch.inspection);

        *self != before
    }

    /// Criteria with a patch applied, leaving `self` untouched.
    pub fn patched(&self, patch: &CriteriaPatch) -> Self {
        let mut next = self.clone();
        next.apply(patch);
        next
    }
}

fn check_bounds<T: PartialOrd + std::fmt::Display>(
    what: &str,
    min: Option<T>,
    max: Option<T>,
) -> Result<()> {
    match (min, max) {
        (Some(min), Some(max)) if min > max => Err(Error::validation(format!(
            "{what} bounds inverted: {min} > {max}"
        ))),
        _ => Ok(()),
    }
}

fn range_label<T: std::fmt::Display>(min: Option<T>, max: Option<T>) -> Option<String> {
    match (min, max) {
        (Some(min), Some(max)) => Some(format!("{min}-{max}")),
        (Some(min), None) => Some(format!("from {min}")),
        (None, Some(max)) => Some(format!("up to {max}")),
        (None, None) => None,
    }
}

/// Update to a single-valued facet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPatch<T> {
    Set(T),
    Clear,
}

/// Update to a multi-valued facet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListPatch {
    /// Replace the whole list.
    Replace(Vec<String>),
    /// Append values not already present.
    Extend(Vec<String>),
    /// Drop the given values.
    Remove(Vec<String>),
    Clear,
}

/// Partial update to [`FilterCriteria`]. `None` leaves a facet as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriteriaPatch {
    pub brand: Option<FieldPatch<String>>,
    pub brand_url: Option<FieldPatch<String>>,
    pub model: Option<FieldPatch<String>>,
    pub models: Option<ListPatch>,
    pub min_year: Option<FieldPatch<u16>>,
    pub max_year: Option<FieldPatch<u16>>,
    pub min_price: Option<FieldPatch<u32>>,
    pub max_price: Option<FieldPatch<u32>>,
    pub min_displacement: Option<FieldPatch<String>>,
    pub max_displacement: Option<FieldPatch<String>>,
    pub engine_types: Option<ListPatch>,
    pub gearbox: Option<ListPatch>,
    pub body_types: Option<ListPatch>,
    pub inspection: Option<ListPatch>,
}

impl CriteriaPatch {
    /// Patch that clears every facet.
    pub fn clear_all() -> Self {
        Self {
            brand: Some(FieldPatch::Clear),
            brand_url: Some(FieldPatch::Clear),
            model: Some(FieldPatch::Clear),
            models: Some(ListPatch::Clear),
            min_year: Some(FieldPatch::Clear),
            max_year: Some(FieldPatch::Clear),
            min_price: Some(FieldPatch::Clear),
            max_price: Some(FieldPatch::Clear),
            min_displacement: Some(FieldPatch::Clear),
            max_displacement: Some(FieldPatch::Clear),
            engine_types: Some(ListPatch::Clear),
            gearbox: Some(ListPatch::Clear),
            body_types: Some(ListPatch::Clear),
            inspection: Some(ListPatch::Clear),
        }
    }
}

fn apply_field<T: Clone>(slot: &mut Option<T>, patch: &Option<FieldPatch<T>>) {
    match patch {
        Some(FieldPatch::Set(v)) => *slot = Some(v.clone()),
        Some(FieldPatch::Clear) => *slot = None,
        None => {}
    }
}

fn apply_list(slot: &mut Vec<String>, patch: &Option<ListPatch>) {
    match patch {
        Some(ListPatch::Replace(values)) => {
            slot.clear();
            for v in values {
                if !slot.contains(v) {
                    slot.push(v.clone());
                }
            }
        }
        Some(ListPatch::Extend(values)) => {
            for v in values {
                if !slot.contains(v) {
                    slot.push(v.clone());
                }
            }
        }
        Some(ListPatch::Remove(values)) => slot.retain(|v| !values.contains(v)),
        Some(ListPatch::Clear) => slot.clear(),
        None => {}
    }
}

mod de {
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, de::Error as _};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    /// Accept `"x"`, `["x", "y"]` or `null`.
    pub fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Option::<OneOrMany>::deserialize(d)? {
            None => Vec::new(),
            Some(OneOrMany::One(s)) if s.trim().is_empty() => Vec::new(),
            Some(OneOrMany::One(s)) => vec![s],
            Some(OneOrMany::Many(v)) => v,
        })
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText<T> {
        Number(T),
        Text(String),
    }

    /// Accept a number, a numeric string, an empty string or `null`.
    pub fn lenient_number<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr + Deserialize<'de>,
    {
        match Option::<NumberOrText<T>>::deserialize(d)? {
            None => Ok(None),
            Some(NumberOrText::Number(n)) => Ok(Some(n)),
            Some(NumberOrText::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(NumberOrText::Text(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("invalid number: {s}"))),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrNumber {
        Text(String),
        Number(serde_json::Number),
    }

    /// Accept a string or a number, stored as text.
    pub fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Option::<TextOrNumber>::deserialize(d)? {
            None => None,
            Some(TextOrNumber::Text(s)) if s.trim().is_empty() => None,
            Some(TextOrNumber::Text(s)) => Some(s),
            Some(TextOrNumber::Number(n)) => Some(n.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toyota() -> FilterCriteria {
        FilterCriteria::brand("Toyota", "https://www.ss.com/en/transport/cars/toyota/")
    }

    #[test]
    fn test_deserialize_stored_record() {
        let json = r#"{
            "name_car": "BMW",
            "url": "https://www.ss.com/en/transport/cars/bmw/",
            "model": "3 series",
            "models": ["316", "318", "320"],
            "min_year": "2010",
            "max_year": 2015,
            "min_price": 3000,
            "max_displacement": 2.0,
            "typengines": ["Diesel"],
            "gearbox": "Manual",
            "bodytypes": [],
            "checkup": ["Yes"]
        }"#;
        let criteria: FilterCriteria = serde_json::from_str(json).unwrap();

        assert_eq!(criteria.brand.as_deref(), Some("BMW"));
        assert_eq!(criteria.models, vec!["316", "318", "320"]);
        assert_eq!(criteria.min_year, Some(2010));
        assert_eq!(criteria.max_year, Some(2015));
        assert_eq!(criteria.min_price, Some(3000));
        assert_eq!(criteria.max_displacement.as_deref(), Some("2.0"));
        assert_eq!(criteria.gearbox, vec!["Manual"]);
        assert!(criteria.body_types.is_empty());
        assert_eq!(criteria.inspection, vec!["Yes"]);
        assert!(criteria.validate().is_ok());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let json = r#"{"name_car": "BMW", "colour": "red"}"#;
        assert!(serde_json::from_str::<FilterCriteria>(json).is_err());
    }

    #[test]
    fn test_serialize_skips_unset() {
        let json = serde_json::to_value(toyota()).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["name_car"], "Toyota");
        assert!(obj.contains_key("url"));
    }

    #[test]
    fn test_validate_bounds() {
        let mut c = toyota();
        c.min_year = Some(2018);
        c.max_year = Some(2010);
        assert!(matches!(c.validate(), Err(Error::Validation(_))));

        let mut c = toyota();
        c.min_displacement = Some("2.5".into());
        c.max_displacement = Some("1.6".into());
        assert!(c.validate().is_err());

        let mut c = toyota();
        c.brand_url = None;
        assert!(c.validate().is_err());

        assert!(FilterCriteria::default().validate().is_err());
    }

    #[test]
    fn test_apply_scalar_and_lists() {
        let mut c = toyota();
        c.body_types = vec!["Sedan".into()];

        let patch = CriteriaPatch {
            model: Some(FieldPatch::Set("Corolla".into())),
            max_price: Some(FieldPatch::Set(8000)),
            body_types: Some(ListPatch::Extend(vec!["Sedan".into(), "Wagon".into()])),
            gearbox: Some(ListPatch::Replace(vec!["Automatic".into()])),
            ..Default::default()
        };
        assert!(c.apply(&patch));
        assert_eq!(c.model.as_deref(), Some("Corolla"));
        assert_eq!(c.max_price, Some(8000));
        assert_eq!(c.body_types, vec!["Sedan", "Wagon"]);
        assert_eq!(c.gearbox, vec!["Automatic"]);

        let patch = CriteriaPatch {
            body_types: Some(ListPatch::Remove(vec!["Sedan".into()])),
            max_price: Some(FieldPatch::Clear),
            ..Default::default()
        };
        assert!(c.apply(&patch));
        assert_eq!(c.body_types, vec!["Wagon"]);
        assert_eq!(c.max_price, None);

        // no-op patch
        assert!(!c.apply(&CriteriaPatch::default()));
    }

    #[test]
    fn test_clear_all_empties() {
        let mut c = toyota();
        c.models = vec!["Corolla".into()];
        c.apply(&CriteriaPatch::clear_all());
        assert!(c.is_empty());
    }

    #[test]
    fn test_search_query_falls_back_to_model() {
        let mut c = toyota();
        c.model = Some("Corolla".into());
        c.min_year = Some(2012);
        let q = c.search_query();
        assert_eq!(q.models, vec!["Corolla"]);
        assert_eq!(q.min_year.as_deref(), Some("2012"));

        c.models = vec!["Corolla Verso".into()];
        assert_eq!(c.search_query().models, vec!["Corolla Verso"]);
    }

    #[test]
    fn test_summary() {
        let mut c = toyota();
        assert_eq!(c.summary(), "Toyota");
        c.model = Some("Corolla".into());
        c.min_year = Some(2010);
        c.max_price = Some(5000);
        c.gearbox = vec!["Manual".into()];
        assert_eq!(c.summary(), "Toyota Corolla, from 2010, up to 5000 EUR, Manual");
    }
}
