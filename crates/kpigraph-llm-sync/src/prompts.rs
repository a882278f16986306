//! Prompt templates for extraction, correction and JSON recovery.

use kpigraph_core::{InvalidEntry, KpiClaim, SourceTable};
use serde::Serialize;

const OUTPUT_SCHEMA: &str = r#"{
  "kpis": [
    {
      "name": "<metric being measured, never empty>",
      "key": "<entity or segment the metric applies to, never empty>",
      "units": "<units from headers or context>",
      "value": <number or null>,
      "year": <integer or null>,
      "row_name": "<exact stub_col text at row_idx>",
      "row_idx": <integer>,
      "col_name": "<exact merged_headers text at col_idx>",
      "col_idx": <integer, at least 1>
    }
  ]
}"#;

const EXTRACTION_RULES: &str = r#"You extract every numerical KPI from a financial table and answer with JSON only.

Financial tables usually report several years side by side (e.g. 2021 and 2020).
Emit one KPI per (row, year column) pair. Do not skip year columns.

Fields:
- name: the metric (from merged_headers, title/section, or the row label), e.g. "Deliveries", "Operating result".
- key: the entity or segment, e.g. "Audi", "Volkswagen Group", "Europe". name and key must differ.
- units: e.g. "€ million", "thousand units", "%". Infer from context if not explicit.
- value: the number. Cells may use European notation: "1,4864" is 1.4864, "−2,5" is -2.5, "1.234,5" is 1234.5.
- year: integer year of the column, or null.
- row_name / col_name: copied exactly from stub_col[row_idx] and merged_headers[col_idx].

Indexing is zero-based:
- row_idx indexes stub_col and rows.
- col_idx indexes merged_headers and each row; col_idx 0 is the row-label column, so data starts at 1.
- Check before answering: rows[row_idx][col_idx] holds value, stub_col[row_idx] == row_name, merged_headers[col_idx] == col_name."#;

const CORRECTION_GUIDE: &str = r#"How to fix:
1. The cell at rows[row_idx][col_idx] is what gets checked. Fix the indices, not the names; afterwards row_name must equal stub_col[row_idx] and col_name must equal merged_headers[col_idx].
2. name equal to key: use the table title / section to decide which text is the metric (name) and which is the entity (key). Example: title "Brand Production", row "Audi" gives name "Production", key "Audi".
3. Value mismatch: look one row or column away (row_idx±1, col_idx±1) for the value and move the indices there.
4. Row or column label mismatch: find the stub_col / merged_headers entry you meant and use its index.
5. European decimals: "1,4864" is 1.4864, "−2,5" is -2.5."#;

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Initial extraction prompt for one table.
pub fn extraction_prompt(table: &SourceTable) -> String {
    format!(
        "{EXTRACTION_RULES}\n\nOUTPUT FORMAT (JSON only, no extra text):\n{OUTPUT_SCHEMA}\n\nTABLE:\n```\n{}\n```\n",
        pretty(table)
    )
}

/// Correction prompt: every invalid claim with its verdict, the full claim
/// set for context, and the table.
///
/// `expected_count` is the size of the first extraction; the model is
/// asked to return that many claims.
pub fn correction_prompt(
    table: &SourceTable,
    claims: &[KpiClaim],
    invalid: &[InvalidEntry],
    expected_count: usize,
) -> String {
    let mut errors = String::new();
    for (i, entry) in invalid.iter().enumerate() {
        let v = &entry.validation;
        let show = |idx: Option<i64>| idx.map_or_else(|| "?".to_string(), |i| i.to_string());
        errors.push_str(&format!(
            "ERROR {n}:\n  KPI: {kpi}\n  Issues: {issues}\n  Checked cell: row_idx={r}, col_idx={c}\n  stub_col[{r}] = '{row_label}'\n  merged_headers[{c}] = '{col_label}'\n  Source: {source} (text: \"{text}\")\n  Extracted: {extracted}\n",
            n = i + 1,
            kpi = serde_json::to_string(&entry.kpi).unwrap_or_default(),
            issues = v.errors.join("; "),
            r = show(v.row_index),
            c = show(v.col_index),
            row_label = v.row_name_match.as_deref().unwrap_or(""),
            col_label = v.col_name_match.as_deref().unwrap_or(""),
            source = v
                .source_cell_value
                .map_or_else(|| "null".to_string(), |s| s.to_string()),
            text = v.source_cell_text.as_deref().unwrap_or(""),
            extracted = v
                .extracted_value
                .map_or_else(|| "null".to_string(), |e| e.to_string()),
        ));
        for fix in &v.fix_instructions {
            errors.push_str(&format!("  FIX: {fix}\n"));
        }
        errors.push('\n');
    }

    format!(
        "Some extracted KPIs failed validation against the table. Correct them.\n\n\
         VALIDATION ERRORS:\n{errors}\
         ALL EXTRACTED KPIs (return all of them, corrected where needed):\n{claims}\n\n\
         TABLE:\n{table}\n\n\
         {CORRECTION_GUIDE}\n\n\
         OUTPUT FORMAT (JSON only, exactly {expected_count} KPIs):\n{OUTPUT_SCHEMA}\n",
        claims = pretty(claims),
        table = pretty(table),
    )
}

/// Recovery prompt after a reply failed to parse.
pub fn recovery_prompt(
    context_prompt: &str,
    malformed: &str,
    parse_error: &str,
    expected_count: Option<usize>,
) -> String {
    let count_hint = expected_count
        .map(|n| format!(" with exactly {n} KPIs"))
        .unwrap_or_default();
    format!(
        "ORIGINAL TASK:\n{context_prompt}\n\n\
         Your previous answer was not valid JSON.\n\n\
         PREVIOUS OUTPUT:\n{malformed}\n\n\
         PARSE ERROR:\n{parse_error}\n\n\
         Return the complete, valid JSON object{count_hint}. Close every bracket and string. \
         No markdown, no commentary.\n\n\
         OUTPUT FORMAT:\n{OUTPUT_SCHEMA}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpigraph_core::IndexValidator;

    fn table() -> SourceTable {
        SourceTable::new("t9", vec![vec!["Audi".into(), "1,5".into()]])
            .with_stub_col(vec!["Audi".into()])
            .with_merged_headers(vec!["".into(), "2021".into()])
            .with_title("Brand Production")
    }

    #[test]
    fn extraction_prompt_embeds_the_table() {
        let p = extraction_prompt(&table());
        assert!(p.contains("\"table_id\": \"t9\""));
        assert!(p.contains("Brand Production"));
        assert!(p.contains("\"kpis\""));
    }

    #[test]
    fn correction_prompt_carries_verdicts_and_count() {
        let t = table();
        let claim = KpiClaim::new("Production", "Audi")
            .with_value(2.0)
            .at(0, 1)
            .labelled("Audi", "2021");
        let verdict = IndexValidator::default().validate(&claim, &t);
        assert!(!verdict.is_valid);
        let invalid = vec![InvalidEntry {
            table_id: t.table_id.clone(),
            kpi: claim.clone(),
            validation: verdict,
        }];
        let p = correction_prompt(&t, &[claim], &invalid, 4);
        assert!(p.contains("ERROR 1:"));
        assert!(p.contains("stub_col[0] = 'Audi'"));
        assert!(p.contains("Source: 1.5 (text: \"1,5\")"));
        assert!(p.contains("exactly 4 KPIs"));
    }

    #[test]
    fn recovery_prompt_mentions_error_and_count() {
        let p = recovery_prompt("TASK", "{\"kpis\": [", "EOF while parsing", Some(3));
        assert!(p.contains("EOF while parsing"));
        assert!(p.contains("with exactly 3 KPIs"));
        let p = recovery_prompt("TASK", "x", "e", None);
        assert!(!p.contains("exactly"));
    }
}
