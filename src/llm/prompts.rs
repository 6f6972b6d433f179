//! Prompt templates for the assessment phases and the meeting analyses.

use crate::mapping::MappingSchema;

/// Mark the model puts in checkbox-coded fields that apply.
pub const CHECK_MARK: &str = "✔";

/// Fields rendered as a checkbox in the template: `✔` or empty.
pub const CHECKBOX_FIELDS: &[&str] = &[
    "麻痺_右上肢",
    "麻痺_左上肢",
    "麻痺_右下肢",
    "麻痺_左下肢",
    "拘縮_肩関節",
    "拘縮_股関節",
    "拘縮_膝関節",
    "利用中サービス_訪問介護",
    "利用中サービス_通所介護",
    "利用中サービス_福祉用具貸与",
    "利用中サービス_短期入所",
];

/// A repeating finding the template has a fixed number of cells for.
#[derive(Debug, Clone, Copy)]
pub struct SlotCluster {
    pub name: &'static str,
    pub description: &'static str,
    pub slots: &'static [&'static str],
}

impl SlotCluster {
    pub fn contains(&self, field_name: &str) -> bool {
        self.slots.contains(&field_name)
    }
}

pub const SLOT_CLUSTERS: &[SlotCluster] = &[
    SlotCluster {
        name: "家族構成",
        description: "家族・親族（氏名、続柄、同居/別居、年齢がわかれば併記）",
        slots: &["家族構成1", "家族構成2", "家族構成3", "家族構成4"],
    },
    SlotCluster {
        name: "既往歴",
        description: "過去にかかった病気・けが・手術（発症時期や治療状況がわかれば併記）",
        slots: &["既往歴1", "既往歴2", "既往歴3", "既往歴4", "既往歴5"],
    },
    SlotCluster {
        name: "身体所見",
        description: "麻痺・拘縮・褥瘡・皮膚疾患・痛み・むくみなど身体面の所見",
        slots: &["身体所見1", "身体所見2", "身体所見3", "身体所見4"],
    },
];

pub fn is_checkbox_field(field_name: &str) -> bool {
    CHECKBOX_FIELDS.contains(&field_name)
}

/// Clusters with at least one slot among `fields`.
pub fn slot_clusters_for<S: AsRef<str>>(fields: &[S]) -> Vec<&'static SlotCluster> {
    SLOT_CLUSTERS
        .iter()
        .filter(|cluster| fields.iter().any(|f| cluster.contains(f.as_ref())))
        .collect()
}

const ASSESSMENT_PREAMBLE: &str = r#"
あなたは、ベテランの認定調査員であり、ケアマネージャーです。
提供されたデータ（音声、PDF、画像など複数可）を注意深く分析し、
「アセスメントシート」を作成するために必要な情報を抽出してください。
"#;

const ASSESSMENT_RULES: &str = r#"
## 抽出ルール
1. **選択肢がある項目**: 必ず提示された選択肢の中から最も適切なものを選んでください。
2. **情報の不在**: 情報が見つからない項目は、空文字 "" としてください。
3. **推測の禁止**: 明確な根拠がない場合は無理に埋めず、空文字 "" にしてください。記載や発言のない情報を作り出してはいけません。
4. **統合**: 複数のファイル（例：音声とPDF）にまたがる情報は、矛盾がないように統合してください。
5. **対象外の項目**: 「抽出項目リスト」にない項目は出力しないでください。
"#;

/// Renders the extraction prompt for one phase.
pub fn synthesize(fields: &[String], schema: &MappingSchema, phase_label: &str) -> String {
    let mut prompt = String::from(ASSESSMENT_PREAMBLE);

    prompt.push_str(&format!(
        "\n今回のフェーズ: 【{}】\n以下の「抽出項目リスト」にある**全ての項目**について、入力データから情報を探してください。\n",
        phase_label
    ));

    prompt.push_str(
        r#"
## 出力形式
以下のキーを持つフラットなJSON形式で出力してください。
キー名は「抽出項目リスト」の名称と完全に一致させてください。

```json
{
  "項目名1": "値1",
  "項目名2": "値2"
}
```
"#,
    );

    prompt.push_str(ASSESSMENT_RULES);

    let checkboxes: Vec<&str> = fields
        .iter()
        .map(String::as_str)
        .filter(|f| is_checkbox_field(f))
        .collect();
    if !checkboxes.is_empty() {
        prompt.push_str(&format!(
            "\n## チェック項目\n以下の項目はチェック欄です。該当する場合は \"{}\"、該当しない・不明な場合は空文字 \"\" を出力してください。それ以外の文字は使わないでください。\n",
            CHECK_MARK
        ));
        for field in &checkboxes {
            prompt.push_str(&format!("- {}\n", field));
        }
    }

    for cluster in slot_clusters_for(fields) {
        prompt.push_str(&sequential_slot_block(cluster));
    }

    prompt.push_str("\n## 抽出項目リスト\n");
    for field in fields {
        let options = schema.options(field);
        if options.is_empty() {
            prompt.push_str(&format!("- {}\n", field));
        } else {
            prompt.push_str(&format!("- {} (選択肢: {})\n", field, options.join("、")));
        }
    }

    prompt
}

fn sequential_slot_block(cluster: &SlotCluster) -> String {
    let slots = cluster.slots.join("、");
    let first = cluster.slots.first().copied().unwrap_or_default();
    let second = cluster.slots.get(1).copied().unwrap_or(first);
    format!(
        r#"
## 連番項目【{name}】の埋め方
「{name}」は枠の数が決まっている連番項目です（{slots}）。
1. 入力データから{description}をすべて洗い出し、出てきた順のリストにしてください。
2. リストの1件目を「{first}」、2件目を「{second}」… と、先頭の枠から順に詰めて入れてください。
3. 途中の枠を空けてはいけません。該当が3件なら最初の3枠を埋め、残りの枠は空文字 "" にしてください。
4. 枠の数より多い場合は、重要なものから枠の数だけ入れてください。
"#,
        name = cluster.name,
        slots = slots,
        description = cluster.description,
        first = first,
        second = second,
    )
}

pub const MEETING_SUMMARY_PROMPT: &str = r#"
あなたはケアマネジメントの専門家であり、医療・福祉分野のプロの記録担当者です。
アップロードされたデータ（複数ファイル可）を注意深く分析し、統合して1つの公式な会議録を作成します。
情報が見つからない項目は空文字 "" とし、推測で埋めないでください。

出力形式は以下のJSONです：
{
  "開催日": "日付",
  "開催場所": "場所",
  "開催時間": "時間",
  "開催回数": "回数",
  "担当者名": "名前",
  "利用者名": "名前",
  "検討内容": "詳細な会議録テキスト",
  "検討した項目": "会議の目的、暫定プラン、重要事項",
  "結論": "決定事項リスト"
}
"#;

pub const SERVICE_MEETING_PROMPT: &str = r#"
あなたはケアマネジメントの専門家であり、医療・福祉分野のプロの記録担当者です。
アップロードされたデータ（複数ファイル可）を注意深く分析し、統合して1つの公式な会議録を作成します。
あなたのタスクは、入力データ全体の内容を完全に理解・把握し、以下の【統合出力フォーマット】に厳密に従って会議録をまとめることです。

# 出力要件
以下のキーを持つJSONオブジェクトを出力してください。
値はマークダウンを含まないプレーンテキストにしてください。
改行は \n で表現してください。
情報が見つからない項目は空文字 "" とし、推測で埋めないでください。

JSONキー仕様:
- "開催日": 日付のみ
- "開催場所": 場所のみ
- "開催時間": 時間のみ
- "開催回数": 回数のみ
- "担当者名": 名前のみ
- "利用者名": 名前のみ
- "参加者": 出席者の所属と氏名を「、」区切りで（例: 本人、長女、訪問介護 田中）
- "検討内容": 【統合出力フォーマット】に従った詳細な会議録テキスト
- "検討した項目": 会議の目的、暫定プラン、重要事項をまとめたテキスト
- "結論": 決定事項、今後の方針、モニタリング点などを箇条書き6~8項目程度

# 【統合出力フォーマット】（検討内容の形式）
①【本人及び家族の意向】...
②【心身・生活状況】...
③【会議の結論・ケアプラン詳細】...
④【各事業所の役割分担と確認事項】...
⑤【福祉用具・住宅改修等に関する検討事項】...

**必須要件**：結論には必ず「サービス担当へ、個別援助計画書の提出を依頼する」という文言を含めてください。
"#;

pub const MANAGEMENT_MEETING_PROMPT: &str = r#"
あなたは、医療・福祉分野のプロの記録担当者です。
入力されたデータ（会議の音声、または記録書類など複数可）を分析・統合し、以下の情報を抽出・整理して、**JSON形式**で出力してください。
情報が見つからない項目は空文字 "" とし、推測で埋めないでください。

## 出力するJSONのキーと作成ルール

1. "meeting_date" (日時)
2. "place" (開催場所)
3. "participants" (参加者)
4. "agenda" (議題項目)
   - 以下の議題リストを確認し、話された内容が含まれていれば行末に「●」を付けてください。
   - 形式はリスト形式ではなく、改行を含む1つのテキスト文字列としてください。
   【議題リストテンプレート】
   ①現に抱える処遇困難ケースについて
   ②過去に取り扱ったケースについての問題点及びその改善方策
   ③地域における事業所や活用できる社会資源の状況
   ④保健医療及び福祉に関する諸制度
   ⑤ケアマネジメントに関する技術
   ⑥利用者からの苦情があった場合は、その内容及び改善方針
   ⑦その他必要な事項

5. "support_24h" (24時間対応)
6. "sharing_matters" (共有事項)
   - 形式:
     ■利用者情報共有
     　...
     ■その他共有事項
     　...

## 出力例 (JSON)
{
  "meeting_date": "令和7年10月6日（月）8時30分～8時40分",
  "place": "第一会議室",
  "participants": "武島、加藤、川路",
  "agenda": "①現に抱える処遇困難ケースについて●\n②過去に取り扱ったケースについての問題点及びその改善方策\n...",
  "support_24h": "12/5 18:00 佐藤対応: 〇〇様転倒により救急搬送。入院となる。",
  "sharing_matters": "■利用者情報共有\n〇武島（ケアマネ）：宮城様 老健退所後の自宅生活...\n\n■その他共有事項\n〇リハビリ：松浦クリニックでの利用が可能か..."
}
"#;

pub const QA_PROMPT: &str = r#"
提供されたデータを質問と回答のペアとして抽出してください。
発言のない回答を作らないでください。
出力形式：
{
  "qa_pairs": [
    {"question": "質問1", "answer": "回答1"},
    {"question": "質問2", "answer": "回答2"}
  ]
}
"#;

pub fn genogram_prompt(text: &str) -> String {
    format!(
        r#"
以下のテキストから家族情報を抽出し、ジェノグラム（家系図）データを生成してください。
テキストに書かれていない家族を追加しないでください。
テキスト: {}
出力JSON形式: {{ "nodes": [{{ "id": "...", "name": "...", "relation": "...", "gender": "...", "deceased": false }}], "edges": [{{ "from": "...", "to": "...", "type": "..." }}] }}
"#,
        text
    )
}

pub fn bodymap_prompt(text: &str) -> String {
    format!(
        r#"
以下のテキストから身体状況（マヒ、欠損、機能低下など）を抽出してください。
テキストに書かれていない所見を追加しないでください。
テキスト: {}
出力JSON形式: {{ "findings": [{{ "part": "...", "condition": "...", "note": "..." }}] }}
"#,
        text
    )
}
