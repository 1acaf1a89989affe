// Golden extraction test: fixtures/wiki/<page>.wiki against <page>.snapshot.json.

use std::path::PathBuf;

use vtwiki_adapters::{classify, extract, PageKind};
use vtwiki_core::{Vtuber, WikiPage};

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/wiki")
}

fn load_page(name: &str, id: i64, title: &str) -> WikiPage {
    let path = fixture_dir().join(format!("{name}.wiki"));
    let raw_content = std::fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("reading {}: {err}", path.display()));
    WikiPage {
        id,
        title: title.to_string(),
        raw_content,
    }
}

fn load_snapshot(name: &str) -> Vtuber {
    let path = fixture_dir().join(format!("{name}.snapshot.json"));
    let data = std::fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("reading {}: {err}", path.display()));
    serde_json::from_str(&data).unwrap_or_else(|err| panic!("parsing {}: {err}", path.display()))
}

#[test]
fn hoshino_sample_matches_snapshot() {
    let page = load_page("hoshino_sample", 1001, "Hoshino Sample");
    assert_eq!(classify(&page), PageKind::Vtuber);

    let extracted = extract(&page);
    let expected = load_snapshot("hoshino_sample");
    assert_eq!(extracted, expected);
}

#[test]
fn repeated_extraction_serializes_identically() {
    let page = load_page("hoshino_sample", 1001, "Hoshino Sample");
    let first = serde_json::to_string(&extract(&page)).unwrap();
    let second = serde_json::to_string(&extract(&page)).unwrap();
    assert_eq!(first, second);
}
