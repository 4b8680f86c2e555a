//! Language-specific prompt templates.

use crate::core::config::Language;

/// Report section headings, in order.
pub fn report_sections(language: Language) -> [&'static str; 3] {
    match language {
        Language::En => ["Segment Profile", "Target Audience Analysis", "Opportunity Analysis"],
        Language::ZhTw => ["區隔輪廓", "目標客群分析", "機會分析"],
    }
}

/// System instruction for the naming call.
pub fn naming_system_instruction(language: Language) -> String {
    match language {
        Language::En => "You are a marketing analyst who names market segments. \
            Reply only with a list literal of quoted strings."
            .to_string(),
        Language::ZhTw => "你是一位行銷分析師，負責為市場區隔命名。\
            只回覆以引號包住的字串清單，例如 ['名稱一', '名稱二']。請使用繁體中文。"
            .to_string(),
    }
}

/// Naming prompt: one line per cluster with its characteristics.
pub fn naming_prompt(language: Language, characteristics: &[&str]) -> String {
    let lines = characteristics
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}. {}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n");
    let n = characteristics.len();
    match language {
        Language::En => format!(
            "The following {n} market segments are described by their distinctive strengths:\n\
             {lines}\n\n\
             Give each segment a short, descriptive name (at most 4 words). \
             Return exactly {n} names, in order, as a list such as ['Name 1', 'Name 2']."
        ),
        Language::ZhTw => format!(
            "以下 {n} 個市場區隔依其顯著優勢描述：\n\
             {lines}\n\n\
             請為每個區隔取一個簡短且具描述性的名稱（不超過 8 個字）。\
             依序回傳恰好 {n} 個名稱，格式如 ['名稱一', '名稱二']。"
        ),
    }
}

/// System instruction for the report call.
pub fn report_system_instruction(language: Language) -> String {
    match language {
        Language::En => {
            "You are a senior marketing strategist writing concise segment reports in markdown."
                .to_string()
        }
        Language::ZhTw => "你是一位資深行銷策略顧問，使用繁體中文以 markdown 撰寫精簡的區隔報告。"
            .to_string(),
    }
}

/// Report prompt embedding the delimited summary table.
pub fn report_prompt(language: Language, table: &str, max_words: usize) -> String {
    let [profile, audience, opportunity] = report_sections(language);
    match language {
        Language::En => format!(
            "Below is a competitive set summary table (columns separated by '|'):\n\n\
             {table}\n\n\
             Write a markdown report with exactly three sections:\n\
             ## {profile}\n## {audience}\n## {opportunity}\n\
             Keep each section under {max_words} words. Refer to segments by name."
        ),
        Language::ZhTw => format!(
            "以下為競爭群組摘要表（欄位以 '|' 分隔）：\n\n\
             {table}\n\n\
             請以 markdown 撰寫報告，恰好包含三個段落：\n\
             ## {profile}\n## {audience}\n## {opportunity}\n\
             每個段落不超過 {max_words} 字，並以區隔名稱指稱各區隔。"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_prompt_lists_clusters() {
        let prompt = naming_prompt(Language::En, &["grip, weight", "No distinctive strengths"]);
        assert!(prompt.contains("1. grip, weight"));
        assert!(prompt.contains("2. No distinctive strengths"));
        assert!(prompt.contains("exactly 2 names"));
    }

    #[test]
    fn test_report_prompt_has_sections_and_table() {
        let prompt = report_prompt(Language::ZhTw, "區隔名稱 | 公司數", 120);
        assert!(prompt.contains("區隔名稱 | 公司數"));
        for section in report_sections(Language::ZhTw) {
            assert!(prompt.contains(&format!("## {section}")));
        }
        assert!(prompt.contains("120"));
    }
}
