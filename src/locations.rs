//! Purpose: NEMSIS Y92 location-code mapping and user-defined groupings.
//! Exports: `mapping`, `code_set`, `describe`, `Grouping` and its file ops.
//! Role: Independent consumer of its own JSON resources; does not use the
//! table store's reader or writer.
//! Invariants: The embedded Y92 mapping is parsed once and cached.
//! Invariants: Grouping files live under `location-codes-groupings/` and are
//! plain JSON, editable by hand.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

/// NEMSIS null sentinel: the element was not applicable for this record.
pub const NOT_APPLICABLE: &str = "7701001";
/// NEMSIS null sentinel: the element was not recorded.
pub const NOT_RECORDED: &str = "7701003";

pub const GROUPING_DIR_NAME: &str = "location-codes-groupings";
const GROUPING_EXT: &str = "json";

static MAPPING_JSON: &str = include_str!("data/y92-mapping.json");
static MAPPING: OnceLock<BTreeMap<String, String>> = OnceLock::new();
static CODE_SET: OnceLock<BTreeSet<String>> = OnceLock::new();

/// The full ICD-10-CM Y92 code-to-description mapping. Parsed from the
/// embedded resource on first use; later calls hit the cache.
pub fn mapping() -> &'static BTreeMap<String, String> {
    MAPPING.get_or_init(|| {
        serde_json::from_str(MAPPING_JSON).expect("embedded y92-mapping.json is well-formed")
    })
}

pub fn code_set() -> &'static BTreeSet<String> {
    CODE_SET.get_or_init(|| mapping().keys().cloned().collect())
}

/// Resolves a location code to its description. The NEMSIS null sentinels
/// resolve without consulting the Y92 listing; anything else must be a known
/// Y92 code.
pub fn describe(code: &str) -> Result<&'static str, Error> {
    match code {
        NOT_APPLICABLE => return Ok("Not Applicable"),
        NOT_RECORDED => return Ok("Not Recorded"),
        _ => {}
    }
    mapping().get(code).map(String::as_str).ok_or_else(|| {
        Error::new(ErrorKind::NotFound)
            .with_message(format!(
                "{code} is not in the NEMSIS data dictionary or Y92 code listing"
            ))
            .with_hint("Run `emstore codes list` to see available groupings.")
    })
}

/// A named categorization of Y92 codes. Categories partition the codes a
/// study cares about; one code may appear in at most one category.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Grouping {
    pub name: String,
    pub categories: BTreeMap<String, Vec<String>>,
}

pub fn grouping_dir(base: &Path) -> PathBuf {
    base.join(GROUPING_DIR_NAME)
}

/// Creates the conventional grouping folder under `base` if absent.
pub fn init_dir(base: &Path) -> Result<PathBuf, Error> {
    let dir = grouping_dir(base);
    std::fs::create_dir_all(&dir)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(&dir).with_source(err))?;
    Ok(dir)
}

/// Sorted names of the groupings stored under `base`. A missing folder holds
/// no groupings.
pub fn list_groupings(base: &Path) -> Result<Vec<String>, Error> {
    let dir = grouping_dir(base);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(&dir)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(&dir).with_source(err))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|err| Error::new(ErrorKind::Io).with_path(&dir).with_source(err))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(GROUPING_EXT) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

pub fn load_grouping(base: &Path, name: &str) -> Result<Grouping, Error> {
    let path = grouping_dir(base).join(format!("{name}.{GROUPING_EXT}"));
    if !path.is_file() {
        tracing::debug!(grouping = name, "grouping miss");
        return Err(Error::new(ErrorKind::NotFound)
            .with_message(format!("no grouping named {name:?}"))
            .with_path(path));
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
    serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Serialization)
            .with_message("grouping file is not valid JSON for a grouping")
            .with_path(&path)
            .with_source(err)
    })
}

pub fn save_grouping(base: &Path, grouping: &Grouping) -> Result<(), Error> {
    let dir = init_dir(base)?;
    let path = dir.join(format!("{}.{GROUPING_EXT}", grouping.name));
    let text = serde_json::to_string_pretty(grouping).map_err(|err| {
        Error::new(ErrorKind::Serialization)
            .with_message("grouping cannot be encoded")
            .with_source(err)
    })?;
    std::fs::write(&path, text)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(&path).with_source(err))?;
    tracing::debug!(grouping = %grouping.name, "grouping saved");
    Ok(())
}

/// Checks that every code in the grouping is a known Y92 code or a NEMSIS
/// null sentinel, and that no code is claimed by two categories.
pub fn validate_grouping(grouping: &Grouping) -> Result<(), Error> {
    let known = code_set();
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for (category, codes) in &grouping.categories {
        for code in codes {
            let code = code.as_str();
            if code != NOT_APPLICABLE && code != NOT_RECORDED && !known.contains(code) {
                return Err(Error::new(ErrorKind::Usage).with_message(format!(
                    "grouping {:?}: category {category:?} lists unknown code {code}",
                    grouping.name
                )));
            }
            if let Some(previous) = seen.insert(code, category.as_str()) {
                return Err(Error::new(ErrorKind::Usage).with_message(format!(
                    "grouping {:?}: code {code} appears in both {previous:?} and {category:?}",
                    grouping.name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        Grouping, code_set, describe, list_groupings, load_grouping, mapping, save_grouping,
        validate_grouping,
    };
    use crate::core::error::ErrorKind;
    use std::collections::BTreeMap;

    #[test]
    fn mapping_is_complete_and_correct() {
        let mapping = mapping();
        assert_eq!(mapping.len(), 246);
        assert_eq!(
            mapping["Y92.0"],
            "Non-institutional (private) residence as the place of occurrence of the external cause"
        );
    }

    #[test]
    fn code_set_mirrors_mapping_keys() {
        let codes = code_set();
        assert_eq!(codes.len(), 246);
        assert!(codes.contains("Y92.000"));
        assert!(codes.contains("Y92.9"));
        assert!(!codes.contains("Y93.0"));
    }

    #[test]
    fn null_sentinels_resolve_without_the_mapping() {
        assert_eq!(describe("7701001").expect("describe"), "Not Applicable");
        assert_eq!(describe("7701003").expect("describe"), "Not Recorded");
    }

    #[test]
    fn unknown_code_is_not_found() {
        let err = describe("Y93.41").expect_err("should miss");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    fn assault_grouping() -> Grouping {
        let mut categories = BTreeMap::new();
        categories.insert(
            "residence".to_string(),
            vec!["Y92.0".to_string(), "Y92.009".to_string()],
        );
        categories.insert(
            "street".to_string(),
            vec!["Y92.410".to_string(), "7701003".to_string()],
        );
        Grouping {
            name: "assault-locations".to_string(),
            categories,
        }
    }

    #[test]
    fn grouping_round_trip_and_listing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let grouping = assault_grouping();
        save_grouping(temp.path(), &grouping).expect("save");

        let names = list_groupings(temp.path()).expect("list");
        assert_eq!(names, vec!["assault-locations"]);

        let loaded = load_grouping(temp.path(), "assault-locations").expect("load");
        assert_eq!(loaded, grouping);
    }

    #[test]
    fn missing_grouping_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_grouping(temp.path(), "nope").expect_err("should miss");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(list_groupings(temp.path()).expect("list").is_empty());
    }

    #[test]
    fn validation_accepts_known_codes_and_sentinels() {
        validate_grouping(&assault_grouping()).expect("valid");
    }

    #[test]
    fn validation_rejects_unknown_codes() {
        let mut grouping = assault_grouping();
        grouping
            .categories
            .get_mut("street")
            .expect("category")
            .push("Y99.9".to_string());
        let err = validate_grouping(&grouping).expect_err("should reject");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.to_string().contains("Y99.9"));
    }

    #[test]
    fn validation_rejects_codes_in_two_categories() {
        let mut grouping = assault_grouping();
        grouping
            .categories
            .get_mut("street")
            .expect("category")
            .push("Y92.0".to_string());
        let err = validate_grouping(&grouping).expect_err("should reject");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.to_string().contains("Y92.0"));
    }
}
