//! Mapping definitions: which spreadsheet cell each named field lands in.
//!
//! A definition is line oriented:
//!
//! ```text
//! ---------- 基本情報 ----------
//! 相談方法：H3（来所、電話、訪問、その他）
//! 要介護度：C9
//! （要支援1、要支援2、要介護1）
//! 利用者氏名：C5
//! ```
//!
//! Blank lines and lines starting with `-` are separators. A field line is the
//! field name, a full-width colon, then the cell address. Enumerated options may
//! follow inline in full-width parentheses or sit alone on the next line.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const FIELD_SEPARATOR: char = '：';
const OPTIONS_OPEN: char = '（';
const OPTIONS_CLOSE: char = '）';

const ASSESSMENT_MAPPING: &str = include_str!("../config/assessment_mapping.txt");
const ASSESSMENT_MAPPING_PART_TWO: &str = include_str!("../config/assessment_mapping_2.txt");
const SERVICE_MEETING_MAPPING: &str = include_str!("../config/service_meeting_mapping.txt");
const MANAGEMENT_MEETING_MAPPING: &str = include_str!("../config/management_meeting_mapping.txt");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub field_name: String,
    /// Column letters followed by a row number, e.g. `C5`.
    pub cell_address: String,
    /// Empty when the field is freeform.
    pub options: Vec<String>,
}

impl MappingEntry {
    pub fn has_options(&self) -> bool {
        !self.options.is_empty()
    }
}

/// Parsed mapping, iterated in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingSchema {
    entries: Vec<MappingEntry>,
    index: HashMap<String, usize>,
}

impl MappingSchema {
    /// Parses a mapping definition. Never fails: lines that do not carry a
    /// recognizable cell address are dropped.
    pub fn parse(text: &str) -> Self {
        let mut schema = Self::default();
        let lines: Vec<&str> = text.lines().map(str::trim).collect();

        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            i += 1;

            if line.is_empty() || line.starts_with('-') {
                continue;
            }

            let Some((name, rest)) = line.split_once(FIELD_SEPARATOR) else {
                continue;
            };

            let Some((cell, cell_end)) = find_cell_address(rest) else {
                debug!("Dropping mapping line without a cell address: {}", line);
                continue;
            };

            let mut options = inline_options(&rest[cell_end..]);

            if options.is_empty() {
                if let Some(next) = lines.get(i) {
                    if next.starts_with(OPTIONS_OPEN) && next.ends_with(OPTIONS_CLOSE) {
                        let inner = &next[OPTIONS_OPEN.len_utf8()..next.len() - OPTIONS_CLOSE.len_utf8()];
                        options = split_options(inner);
                        i += 1;
                    }
                }
            }

            schema.insert(MappingEntry {
                field_name: name.trim().to_string(),
                cell_address: cell.to_string(),
                options,
            });
        }

        schema
    }

    /// Reads and parses a definition file. A missing or unreadable file
    /// degrades to an empty schema; writes against it fail with
    /// [`crate::CareSheetError::MappingNotLoaded`].
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let schema = Self::parse(&text);
                debug!("Loaded {} mapping entries from {:?}", schema.len(), path);
                schema
            }
            Err(e) => {
                warn!("Failed to load mapping file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Main assessment sheet (アセスメントシート).
    pub fn assessment() -> Self {
        Self::parse(ASSESSMENT_MAPPING)
    }

    /// Second worksheet of the assessment template (課題分析).
    pub fn assessment_part_two() -> Self {
        Self::parse(ASSESSMENT_MAPPING_PART_TWO)
    }

    /// Standalone service-meeting document (サービス担当者会議の要点).
    pub fn service_meeting_document() -> Self {
        Self::parse(SERVICE_MEETING_MAPPING)
    }

    /// Standalone management-meeting document (運営会議録).
    pub fn management_meeting_document() -> Self {
        Self::parse(MANAGEMENT_MEETING_MAPPING)
    }

    /// Entries of `self` followed by the entries of `other`; `other` wins on
    /// duplicate names.
    pub fn merged(&self, other: &MappingSchema) -> Self {
        let mut schema = self.clone();
        for entry in other.iter() {
            schema.insert(entry.clone());
        }
        schema
    }

    /// Inserts an entry. A duplicate name replaces the earlier entry in place.
    pub fn insert(&mut self, entry: MappingEntry) {
        match self.index.get(&entry.field_name) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.index.insert(entry.field_name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn get(&self, field_name: &str) -> Option<&MappingEntry> {
        self.index.get(field_name).map(|&pos| &self.entries[pos])
    }

    pub fn options(&self, field_name: &str) -> &[String] {
        self.get(field_name).map(|e| e.options.as_slice()).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.iter()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.field_name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// First `[A-Z]+[0-9]+` in `text`, with the byte offset just past it.
fn find_cell_address(text: &str) -> Option<(&str, usize)> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_uppercase() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_uppercase() {
            i += 1;
        }
        let digits_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i > digits_start {
            return Some((&text[start..i], i));
        }
    }
    None
}

fn inline_options(text: &str) -> Vec<String> {
    let Some(open) = text.find(OPTIONS_OPEN) else {
        return Vec::new();
    };
    let body = &text[open + OPTIONS_OPEN.len_utf8()..];
    match body.find(OPTIONS_CLOSE) {
        Some(close) if close > 0 => split_options(&body[..close]),
        _ => Vec::new(),
    }
}

fn split_options(text: &str) -> Vec<String> {
    text.split(|c: char| matches!(c, '、' | '，' | ','))
        .map(str::trim)
        .filter(|opt| !opt.is_empty())
        .map(str::to_string)
        .collect()
}
