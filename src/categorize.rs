//! Splits the assessment fields into semantic extraction phases.
//!
//! One prompt cannot reliably fill several hundred fields, and each phase's
//! prompt should only carry the instructions relevant to its fields. A field
//! joins the first phase, in [`PRECEDENCE`] order, with a keyword contained in
//! its name. Anything unmatched goes to [`Phase::Other`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    BasicInfo,
    MedicalHistory,
    PhysicalAdl,
    Cognition,
    Services,
    Environment,
    Other,
}

impl Phase {
    /// Natural numbering, also the order phases are merged in.
    pub const ALL: [Phase; 7] = [
        Phase::BasicInfo,
        Phase::MedicalHistory,
        Phase::PhysicalAdl,
        Phase::Cognition,
        Phase::Services,
        Phase::Environment,
        Phase::Other,
    ];

    pub fn number(self) -> usize {
        self as usize + 1
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::BasicInfo => "基本情報",
            Phase::MedicalHistory => "医療・病歴",
            Phase::PhysicalAdl => "身体機能・ADL",
            Phase::Cognition => "認知・精神・コミュニケーション",
            Phase::Services => "サービス利用",
            Phase::Environment => "生活環境・総括",
            Phase::Other => "その他",
        }
    }

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Phase::BasicInfo => &[
                "氏名", "フリガナ", "性別", "生年月日", "年齢", "住所", "電話", "連絡先", "続柄",
                "相談", "受付", "要介護", "要支援", "認定", "保険", "自立度", "家族構成",
            ],
            Phase::MedicalHistory => &[
                "主治医", "医療", "医師", "病", "既往", "疾患", "服薬", "薬", "通院", "入院", "治療",
                "診断",
            ],
            Phase::PhysicalAdl => &[
                "寝返り", "起き上がり", "座位", "立ち上がり", "歩行", "移乗", "移動", "食事", "排尿",
                "排便", "排泄", "入浴", "更衣", "整容", "麻痺", "拘縮", "褥瘡", "身体",
            ],
            Phase::Cognition => &[
                "認知", "意思", "記憶", "徘徊", "精神", "行動", "視力", "聴力", "会話",
                "コミュニケーション",
            ],
            Phase::Services => &[
                "サービス", "事業所", "福祉用具", "住宅改修", "ヘルパー", "デイ", "ショートステイ",
            ],
            Phase::Environment => &[
                "住", "環境", "生活", "状況", "特記", "総括", "課題", "意向", "経済", "介護者",
            ],
            Phase::Other => &[],
        }
    }
}

/// Order phases are tested in. Narrow phases come before the broad ones that
/// would otherwise swallow their fields: services before environment, medical
/// before basic info.
pub const PRECEDENCE: [Phase; 6] = [
    Phase::Services,
    Phase::MedicalHistory,
    Phase::PhysicalAdl,
    Phase::Cognition,
    Phase::BasicInfo,
    Phase::Environment,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGroup {
    pub phase: Phase,
    pub label: String,
    pub fields: Vec<String>,
}

impl FieldGroup {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

pub fn classify(field_name: &str) -> Phase {
    PRECEDENCE
        .iter()
        .copied()
        .find(|phase| phase.keywords().iter().any(|kw| field_name.contains(kw)))
        .unwrap_or(Phase::Other)
}

/// Partitions `field_names` into one group per phase, in phase order. Groups
/// may be empty; names keep their input order within a group.
pub fn categorize<S: AsRef<str>>(field_names: &[S]) -> Vec<FieldGroup> {
    let mut groups: Vec<FieldGroup> = Phase::ALL
        .iter()
        .map(|&phase| FieldGroup {
            phase,
            label: phase.label().to_string(),
            fields: Vec::new(),
        })
        .collect();

    for name in field_names {
        let name = name.as_ref();
        let phase = classify(name);
        groups[phase as usize].fields.push(name.to_string());
    }

    groups
}
