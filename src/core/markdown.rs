//! Small markdown helpers: level-N section splitting and `---` front matter.

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    /// heading line plus body, without trailing blank lines
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SectionedDocument {
    pub preamble: String,
    pub sections: Vec<Section>,
}

impl SectionedDocument {
    pub fn get(&self, name: &str) -> Option<&Section> {
        let wanted = name.trim().to_lowercase();
        self.sections
            .iter()
            .find(|s| s.name.trim().to_lowercase() == wanted)
    }

    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        if !self.preamble.trim().is_empty() {
            parts.push(self.preamble.trim_end().to_string());
        }
        parts.extend(self.sections.iter().map(|s| s.text.trim_end().to_string()));
        let mut out = parts.join("\n\n");
        out.push('\n');
        out
    }
}

fn heading_name(line: &str, level: usize) -> Option<&str> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes != level {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let name = rest.trim().trim_end_matches('#').trim();
    (!name.is_empty()).then_some(name)
}

/// 依指定層級的標題切分；程式碼區塊中的 `#` 不算
pub fn parse_sections(content: &str, level: usize) -> SectionedDocument {
    let mut doc = SectionedDocument::default();
    let mut preamble = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    let mut in_fence = false;

    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        let heading = if in_fence { None } else { heading_name(line, level) };
        match heading {
            Some(name) => {
                if let Some((name, lines)) = current.take() {
                    doc.sections.push(Section {
                        name,
                        text: lines.join("\n").trim_end().to_string(),
                    });
                }
                current = Some((name.to_string(), vec![line]));
            }
            None => match current.as_mut() {
                Some((_, lines)) => lines.push(line),
                None => preamble.push(line),
            },
        }
    }
    if let Some((name, lines)) = current {
        doc.sections.push(Section {
            name,
            text: lines.join("\n").trim_end().to_string(),
        });
    }
    doc.preamble = preamble.join("\n").trim_end().to_string();
    doc
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(s) => Some(s),
            FieldValue::List(_) => None,
        }
    }

    pub fn items(&self) -> Vec<String> {
        match self {
            FieldValue::Scalar(s) if s.is_empty() => Vec::new(),
            FieldValue::Scalar(s) => vec![s.clone()],
            FieldValue::List(items) => items.clone(),
        }
    }
}

/// 保留欄位順序的 front matter
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrontMatter {
    pub fields: Vec<(String, FieldValue)>,
}

impl FrontMatter {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn set(&mut self, key: &str, value: FieldValue) {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key.to_string(), value)),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("---\n");
        for (key, value) in &self.fields {
            match value {
                FieldValue::Scalar(s) => out.push_str(&format!("{}: {}\n", key, s)),
                FieldValue::List(items) => {
                    out.push_str(&format!("{}: [{}]\n", key, items.join(", ")))
                }
            }
        }
        out.push_str("---\n");
        out
    }
}

fn parse_inline_list(value: &str) -> Option<Vec<String>> {
    let inner = value.strip_prefix('[')?.strip_suffix(']')?;
    Some(
        inner
            .split(',')
            .map(|s| s.trim().trim_matches('"').trim_matches('\'').to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

/// 拆出 front matter 與正文；沒有或未關閉時回傳 None 與原文
pub fn split_front_matter(content: &str) -> (Option<FrontMatter>, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (None, content);
    };

    let mut offset = 0;
    let mut block_end = None;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            block_end = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let Some((end, body_start)) = block_end else {
        return (None, content);
    };

    let mut fm = FrontMatter::default();
    let mut pending_list: Option<String> = None;
    for line in rest[..end].lines() {
        let trimmed = line.trim();
        if let (Some(key), Some(item)) = (pending_list.as_ref(), trimmed.strip_prefix("- ")) {
            let key = key.clone();
            let mut items = fm.get(&key).map(|v| v.items()).unwrap_or_default();
            items.push(item.trim().to_string());
            fm.set(&key, FieldValue::List(items));
            continue;
        }
        pending_list = None;
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim();
        if value.is_empty() {
            fm.set(&key, FieldValue::List(Vec::new()));
            pending_list = Some(key);
        } else if let Some(items) = parse_inline_list(value) {
            fm.set(&key, FieldValue::List(items));
        } else {
            fm.set(&key, FieldValue::Scalar(value.to_string()));
        }
    }

    (Some(fm), &rest[body_start..])
}

/// 以 `---` 開頭卻沒有結尾
pub fn has_unterminated_front_matter(content: &str) -> bool {
    (content.starts_with("---\n") || content.starts_with("---\r\n"))
        && split_front_matter(content).0.is_none()
}

pub fn join_front_matter(fm: Option<&FrontMatter>, body: &str) -> String {
    match fm {
        Some(fm) => format!("{}{}", fm.render(), body),
        None => body.to_string(),
    }
}
