//! Search form filling and result extraction.
//!
//! The site's search form uses select boxes whose option *values* are opaque
//! ids, while users pick by *label*. [`SearchForm::from_page`] reads the form
//! once so that [`SearchForm::fill`] can translate labels into values. Labels
//! the form does not offer are skipped, the same way a user could not pick them.

use std::collections::HashMap;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::ParseError;

static FORM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("form").unwrap());
static SUBMIT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#sbtn").unwrap());
static SELECT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("select[name]").unwrap());
static OPTION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("option").unwrap());
static HIDDEN: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[type='hidden'][name]").unwrap());
static RESULT_ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.am").unwrap());

/// Form field names used by the car search form.
mod field {
    pub const MODELS: &str = "cid[]";
    pub const MIN_YEAR: &str = "topt[18][min]";
    pub const MAX_YEAR: &str = "topt[18][max]";
    pub const MIN_DISPLACEMENT: &str = "topt[15][min]";
    pub const MAX_DISPLACEMENT: &str = "topt[15][max]";
    pub const ENGINE_TYPES: &str = "opt[34][]";
    pub const GEARBOX: &str = "opt[35][]";
    pub const BODY_TYPES: &str = "opt[32][]";
    pub const INSPECTION: &str = "opt[223][]";
    pub const MIN_PRICE: &str = "topt[8][min]";
    pub const MAX_PRICE: &str = "topt[8][max]";
    pub const DEAL_TYPE: &str = "sid";
}

/// Deal type label selected for every search.
const DEAL_TYPE_SELL: &str = "Sell";

/// Search parameters expressed as the labels a user sees on the site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub models: Vec<String>,
    pub min_year: Option<String>,
    pub max_year: Option<String>,
    pub min_displacement: Option<String>,
    pub max_displacement: Option<String>,
    pub engine_types: Vec<String>,
    pub gearbox: Vec<String>,
    pub body_types: Vec<String>,
    pub inspection: Vec<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
}

/// One row of a result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub title: String,
    pub link: String,
}

/// The search form of a brand category page.
#[derive(Debug, Clone)]
pub struct SearchForm {
    action: Url,
    hidden: Vec<(String, String)>,
    /// `select name -> [(label, value)]`
    selects: HashMap<String, Vec<(String, String)>>,
}

impl SearchForm {
    /// Read the search form from a category search page.
    pub fn from_page(html: &str, page_url: &str) -> Result<Self, ParseError> {
        if html.trim().is_empty() {
            return Err(ParseError::EmptyPage);
        }
        let page_url =
            Url::parse(page_url).map_err(|_| ParseError::InvalidUrl(page_url.to_string()))?;
        let document = Html::parse_document(html);

        let form = document
            .select(&FORM)
            .find(|f| f.select(&SUBMIT).next().is_some())
            .or_else(|| document.select(&FORM).find(|f| f.select(&SELECT).next().is_some()))
            .ok_or(ParseError::FormNotFound)?;

        let action = form
            .value()
            .attr("action")
            .and_then(|a| page_url.join(a).ok())
            .unwrap_or(page_url);

        let hidden = form
            .select(&HIDDEN)
            .filter_map(|input| {
                let name = input.value().attr("name")?;
                let value = input.value().attr("value").unwrap_or_default();
                Some((name.to_string(), value.to_string()))
            })
            .collect();

        let mut selects: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for select in form.select(&SELECT) {
            let Some(name) = select.value().attr("name") else {
                continue;
            };
            let options = select
                .select(&OPTION)
                .filter_map(|opt| {
                    let label = element_text(&opt);
                    if label.is_empty() {
                        return None;
                    }
                    let value = opt
                        .value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| label.clone());
                    Some((label, value))
                })
                .collect();
            selects.insert(name.to_string(), options);
        }

        Ok(Self {
            action,
            hidden,
            selects,
        })
    }

    /// Where the filled form is submitted.
    pub fn action(&self) -> &Url {
        &self.action
    }

    /// Labels offered by a select box, in page order.
    pub fn labels(&self, name: &str) -> Vec<&str> {
        self.selects
            .get(name)
            .map(|opts| opts.iter().map(|(label, _)| label.as_str()).collect())
            .unwrap_or_default()
    }

    /// Build the form body for a query.
    pub fn fill(&self, query: &SearchQuery) -> Vec<(String, String)> {
        let mut body = self.hidden.clone();

        self.push_select(&mut body, field::MODELS, &query.models);
        self.push_select(&mut body, field::MIN_YEAR, query.min_year.as_slice());
        self.push_select(&mut body, field::MAX_YEAR, query.max_year.as_slice());
        push_input(&mut body, field::MIN_DISPLACEMENT, &query.min_displacement);
        push_input(&mut body, field::MAX_DISPLACEMENT, &query.max_displacement);
        self.push_select(&mut body, field::ENGINE_TYPES, &query.engine_types);
        self.push_select(&mut body, field::GEARBOX, &query.gearbox);
        self.push_select(&mut body, field::BODY_TYPES, &query.body_types);
        self.push_select(&mut body, field::INSPECTION, &query.inspection);
        push_input(&mut body, field::MIN_PRICE, &query.min_price);
        push_input(&mut body, field::MAX_PRICE, &query.max_price);
        self.push_select(&mut body, field::DEAL_TYPE, &[DEAL_TYPE_SELL.to_string()]);

        body
    }

    fn push_select(&self, body: &mut Vec<(String, String)>, name: &str, labels: &[String]) {
        if labels.is_empty() {
            return;
        }
        let Some(options) = self.selects.get(name) else {
            debug!(field = name, "select not present on search form");
            return;
        };
        for label in labels {
            match options.iter().find(|(l, _)| l == label) {
                Some((_, value)) => body.push((name.to_string(), value.clone())),
                None => debug!(field = name, label = %label, "label not offered, skipping"),
            }
        }
    }
}

fn push_input(body: &mut Vec<(String, String)>, name: &str, value: &Option<String>) {
    if let Some(v) = value.as_deref().map(str::trim)
        && !v.is_empty()
    {
        body.push((name.to_string(), v.to_string()));
    }
}

/// Extract listing rows from a result page, in page order.
///
/// Relative links are resolved against `base_url`. Rows without a link are
/// dropped.
pub fn parse_results(html: &str, base_url: &str) -> Vec<ListingRow> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    document
        .select(&RESULT_ANCHOR)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            if href.is_empty() {
                return None;
            }
            let link = base.join(href).ok()?;
            Some(ListingRow {
                title: element_text(&a),
                link: link.to_string(),
            })
        })
        .collect()
}

/// Element text with whitespace runs collapsed.
pub(crate) fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
