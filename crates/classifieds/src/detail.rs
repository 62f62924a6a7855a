//! Listing detail page extraction.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::escape_html;
use crate::search::element_text;

static PHOTO: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.pic_dv_thumbnail a").unwrap());
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static CONTACT_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td.ads_contacts_name").unwrap());
static ADDRESS_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.a9a").unwrap());

/// Labelled fields in display order: `(element id, caption template)`.
const FIELDS: &[(&str, &str)] = &[
    ("tdo_31", "\u{1f699} <b>{}</b>"),
    ("tdo_8", "<b>Price:</b> {}"),
    ("tdo_18", "<b>Year:</b> {}"),
    ("tdo_15", "<b>Engine type:</b> {}"),
    ("tdo_35", "<b>Gearbox:</b> {}"),
    ("tdo_16", "<b>Mileage:</b> {}"),
    ("tdo_223", "<b>Checkup:</b> {}"),
];

/// Notification payload extracted from a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDetail {
    /// Full-size photo URL.
    pub image: String,
    /// HTML caption.
    pub message: String,
}

/// Parse a listing page into a photo and caption.
///
/// Fails when the page is empty, has no photo, or carries none of the
/// labelled fields.
pub fn parse_detail(html: &str, page_url: &str) -> Result<ListingDetail, ParseError> {
    if html.trim().is_empty() {
        return Err(ParseError::EmptyPage);
    }
    let document = Html::parse_document(html);

    let image = document
        .select(&PHOTO)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string);

    let mut parts: Vec<String> = FIELDS
        .iter()
        .filter_map(|(id, template)| {
            let selector = Selector::parse(&format!("#{id}")).ok()?;
            let text = document.select(&selector).next().map(|el| element_text(&el))?;
            if text.is_empty() {
                return None;
            }
            Some(template.replace("{}", &escape_html(&text)))
        })
        .collect();

    let Some(image) = image else {
        return Err(ParseError::MissingFields);
    };
    if parts.is_empty() {
        return Err(ParseError::MissingFields);
    }

    if let Some(address) = address(&document) {
        parts.push(format!("<b>Address:</b> {}", escape_html(&address)));
    }
    if let Some(place) = place(&document) {
        parts.push(format!("<b>Place:</b> {}", escape_html(&place)));
    }
    parts.push(format!(
        "<a href='{}'>Go to webpage</a>",
        escape_html(page_url)
    ));

    Ok(ListingDetail {
        image,
        message: parts.join("\n"),
    })
}

fn next_cell<'a>(el: &ElementRef<'a>, class: Option<&str>) -> Option<ElementRef<'a>> {
    el.next_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|sib| sib.value().name() == "td")
        .find(|sib| {
            class.is_none_or(|c| {
                sib.value()
                    .has_class(c, scraper::CaseSensitivity::CaseSensitive)
            })
        })
}

fn address(document: &Html) -> Option<String> {
    let label = document
        .select(&CONTACT_NAME)
        .find(|td| element_text(td) == "Address:")?;
    let cell = next_cell(&label, None)?;
    let text = cell
        .select(&ADDRESS_LINK)
        .next()
        .map(|a| element_text(&a))
        .unwrap_or_else(|| element_text(&cell));
    (!text.is_empty()).then_some(text)
}

fn place(document: &Html) -> Option<String> {
    let label = document
        .select(&CELL)
        .find(|td| element_text(td).contains("Place:"))?;
    let cell = next_cell(&label, Some("ads_contacts"))?;
    let text = element_text(&cell);
    (!text.is_empty()).then_some(text)
}
