//! Markup field extraction: raw wiki page text to a typed [`Vtuber`] draft.
//!
//! Extraction is pure. Anything absent or unparseable becomes an empty value
//! or a [`vtwiki_core::Measurement`] sentinel, never an error.

pub mod dates;
pub mod markup;
pub mod numeric;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use vtwiki_core::{Vtuber, WikiPage};

pub use dates::parse_date;
pub use markup::{
    classify_channel_url, clean_markup, first_infobox_params, infobox_params, parse_channels,
    parse_image_name, parse_links, parse_list, parse_text, plain_text,
};
pub use numeric::parse_measurement;

pub const INFOBOX_TEMPLATE: &str = "Infobox VTuber";

// Flag pairs, or a pictograph with its modifiers and any ZWJ-joined parts.
static EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\p{Regional_Indicator}{2}",
        r"|\p{Extended_Pictographic}[\x{FE0F}\x{20E3}\p{Emoji_Modifier}\x{E0020}-\x{E007F}]*",
        r"(?:\x{200D}\p{Extended_Pictographic}[\x{FE0F}\p{Emoji_Modifier}]*)*",
    ))
    .expect("emoji regex")
});
static REDIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)#redirect").expect("redirect regex"));
static INFOBOX_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\{\{\s*infobox[ _]+vtuber\b").expect("infobox regex"));

/// Why a page was or was not accepted into the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Vtuber,
    Redirect,
    MissingInfobox,
    /// Gallery or discography sub-page of a vtuber page.
    SubPage,
}

pub fn classify(page: &WikiPage) -> PageKind {
    if REDIRECT.is_match(&page.raw_content) {
        return PageKind::Redirect;
    }
    let title = page.title.to_ascii_lowercase();
    if title.contains("/gallery") || title.contains("/discography") {
        return PageKind::SubPage;
    }
    if !INFOBOX_MARKER.is_match(&page.raw_content) {
        return PageKind::MissingInfobox;
    }
    PageKind::Vtuber
}

pub fn is_vtuber_page(page: &WikiPage) -> bool {
    classify(page) == PageKind::Vtuber
}

/// Emoji of `value`, sorted so reordering on the wiki does not count as a
/// change. ZWJ sequences, flags and skin tones sort as one unit.
pub fn parse_emoji(value: &str) -> Option<String> {
    let mut emoji = EMOJI
        .find_iter(value)
        .map(|m| m.as_str())
        .collect::<Vec<_>>();
    if emoji.is_empty() {
        return None;
    }
    emoji.sort_unstable();
    Some(emoji.concat())
}

struct Infobox(BTreeMap<String, String>);

impl Infobox {
    fn raw(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or_default()
    }

    fn list(&self, key: &str) -> Vec<String> {
        parse_list(self.raw(key))
    }

    fn text(&self, key: &str) -> Option<String> {
        parse_text(self.raw(key))
    }

    fn date(&self, key: &str) -> Option<chrono::NaiveDate> {
        parse_date(&plain_text(self.raw(key)))
    }
}

/// Builds the profile draft for `page`. Agencies and channel metadata are
/// left for the resolver and the enrichment stage.
pub fn extract(page: &WikiPage) -> Vtuber {
    let cleaned = clean_markup(&page.raw_content);
    let infobox = Infobox(infobox_params(&cleaned, INFOBOX_TEMPLATE));

    let character_2d_modelers = infobox.list("character_2d_modeler");
    let character_3d_modelers = infobox.list("character_3d_modeler");

    Vtuber {
        id: page.id,
        name: page.title.trim().to_string(),
        image: parse_image_name(infobox.raw("image")),
        original_names: infobox.list("original_name"),
        nicknames: infobox.list("nick_name"),
        caption: infobox.text("caption"),
        gender: infobox.text("gender"),
        blood_type: infobox.text("blood_type"),
        zodiac_sign: infobox.text("zodiac_sign"),
        emoji: parse_emoji(infobox.raw("emoji")),
        age: parse_measurement(&plain_text(infobox.raw("age"))),
        height: parse_measurement(&plain_text(infobox.raw("height"))),
        weight: parse_measurement(&plain_text(infobox.raw("weight"))),
        debut_date: infobox.date("debut_date"),
        retirement_date: infobox.date("retirement_date"),
        birthday: infobox.date("birthday"),
        has_2d: !character_2d_modelers.is_empty(),
        has_3d: !character_3d_modelers.is_empty(),
        character_designers: infobox.list("character_designer"),
        character_2d_modelers,
        character_3d_modelers,
        agencies: Vec::new(),
        affiliations: infobox.list("affiliation"),
        channels: parse_channels(infobox.raw("channel")),
        social_medias: parse_links(infobox.raw("social_media")),
        official_websites: parse_links(infobox.raw("official_website")),
    }
}

/// Image file name from whatever infobox an agency page uses.
pub fn agency_image_name(page: &WikiPage) -> Option<String> {
    let cleaned = clean_markup(&page.raw_content);
    first_infobox_params(&cleaned)
        .get("image")
        .and_then(|value| parse_image_name(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use vtwiki_core::{ChannelType, Measurement};

    fn page(title: &str, content: &str) -> WikiPage {
        WikiPage {
            id: 11,
            title: title.to_string(),
            raw_content: content.to_string(),
        }
    }

    const SAMPLE: &str = "{{Infobox_VTuber\n\
        |image = [[File:Sample Full.png|250px]]\n\
        |original_name = サンプル<br>Sample\n\
        |age = 17<ref>profile</ref>\n\
        |height = 155 cm\n\
        |weight = ???\n\
        |emoji = 🌸🐱\n\
        |debut_date = June 3, 2021\n\
        |birthday = [[March 14]]\n\
        |affiliation = [[Example Agency|Example]]<br>Indie\n\
        |channel = [https://www.youtube.com/channel/UC1 YouTube]<br>[https://www.twitch.tv/sample Twitch]\n\
        |character_designer = [[Artist A]]\n\
        |character_3d_modeler = Modeler B\n\
        }}\n'''Sample''' is a VTuber.";

    #[test]
    fn classification_rejects_redirects_subpages_and_plain_pages() {
        assert_eq!(classify(&page("Sample", SAMPLE)), PageKind::Vtuber);
        assert_eq!(
            classify(&page("Old Name", "#REDIRECT [[Sample]]")),
            PageKind::Redirect
        );
        assert_eq!(classify(&page("Sample/Gallery", SAMPLE)), PageKind::SubPage);
        assert_eq!(
            classify(&page("Sample/Discography", SAMPLE)),
            PageKind::SubPage
        );
        assert_eq!(
            classify(&page("Some Agency", "{{Infobox Company}}")),
            PageKind::MissingInfobox
        );
    }

    #[test]
    fn extracts_typed_fields() {
        let vtuber = extract(&page("Sample", SAMPLE));

        assert_eq!(vtuber.id, 11);
        assert_eq!(vtuber.name, "Sample");
        assert_eq!(vtuber.image.as_deref(), Some("Sample Full.png"));
        assert_eq!(vtuber.original_names, vec!["サンプル", "Sample"]);
        assert_eq!(vtuber.age, Measurement::Value(17.0));
        assert_eq!(vtuber.height, Measurement::Value(155.0));
        assert_eq!(vtuber.weight, Measurement::Uncountable);
        assert_eq!(vtuber.debut_date, NaiveDate::from_ymd_opt(2021, 6, 3));
        assert_eq!(
            vtuber.birthday,
            NaiveDate::from_ymd_opt(dates::YEARLESS, 3, 14)
        );
        assert_eq!(vtuber.affiliations, vec!["Example", "Indie"]);
        assert_eq!(vtuber.channels.len(), 2);
        assert_eq!(vtuber.channels[0].channel_type, ChannelType::Youtube);
        assert_eq!(vtuber.channels[1].channel_type, ChannelType::Twitch);
        assert!(vtuber.channels.iter().all(|c| !c.is_resolved()));
        assert_eq!(vtuber.character_designers, vec!["Artist A"]);
        assert!(!vtuber.has_2d);
        assert!(vtuber.has_3d);
        assert!(vtuber.agencies.is_empty());
    }

    #[test]
    fn extraction_is_deterministic() {
        let first = extract(&page("Sample", SAMPLE));
        let second = extract(&page("Sample", SAMPLE));
        assert_eq!(first, second);
    }

    #[test]
    fn agency_pages_yield_their_logo() {
        let agency = page(
            "Category:Stellar Works",
            "{{Infobox Agency\n|image = [[File:Stellar Logo.png|200px]]\n|founded = 2019}}",
        );
        assert_eq!(agency_image_name(&agency).as_deref(), Some("Stellar Logo.png"));
        assert_eq!(agency_image_name(&page("Category:Bare", "Members.")), None);
    }

    #[test]
    fn emoji_are_sorted_and_text_is_dropped() {
        assert_eq!(parse_emoji("🐱 and 🌸"), parse_emoji("🌸🐱"));
        assert_eq!(parse_emoji("none here"), None);
        assert_eq!(parse_emoji(""), None);
    }

    #[test]
    fn composite_emoji_stay_whole() {
        let rainbow = "\u{1F3F3}\u{FE0F}\u{200D}\u{1F308}";
        let wave = "\u{1F44B}\u{1F3FD}";
        let japan = "\u{1F1EF}\u{1F1F5}";
        let sorted = parse_emoji(&format!("{rainbow} {wave} {japan}")).unwrap();

        assert!(sorted.contains(rainbow));
        assert!(sorted.contains(wave));
        assert!(sorted.contains(japan));
        assert_eq!(
            parse_emoji(&format!("{japan}{wave}{rainbow}")).as_deref(),
            Some(sorted.as_str())
        );
    }
}
