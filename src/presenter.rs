use crate::sync::ResultSet;
use regex::RegexBuilder;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub input_text: String,
    pub popup_open: bool,
}

impl ViewState {
    pub fn on_focus(&mut self) {
        self.popup_open = true;
    }

    pub fn on_blur(&mut self) {
        self.popup_open = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PopupPolicy {
    /// The list follows input focus alone, even with no results.
    #[default]
    FocusOnly,
    FocusWithResults,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub highlighted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightedText {
    pub segments: Vec<Segment>,
}

impl HighlightedText {
    fn push(&mut self, text: &str, highlighted: bool) {
        if text.is_empty() {
            return;
        }
        self.segments.push(Segment {
            text: text.to_string(),
            highlighted,
        });
    }

    pub fn plain(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    /// Renders highlighted segments between `open` and `close`.
    pub fn marked(&self, open: &str, close: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            if segment.highlighted {
                out.push_str(open);
                out.push_str(&segment.text);
                out.push_str(close);
            } else {
                out.push_str(&segment.text);
            }
        }
        out
    }

    pub fn highlighted_parts(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter(|s| s.highlighted)
            .map(|s| s.text.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRow {
    pub name: HighlightedText,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderModel {
    pub result_count: usize,
    pub show_list: bool,
    pub rows: Vec<RenderRow>,
}

/// Splits `text` around every case-insensitive occurrence of `keyword`,
/// taken literally. An empty keyword leaves the text as a single plain
/// segment.
pub fn highlight_keyword(text: &str, keyword: &str) -> HighlightedText {
    let mut out = HighlightedText::default();
    if keyword.is_empty() {
        out.push(text, false);
        return out;
    }

    let Ok(re) = RegexBuilder::new(&regex::escape(keyword))
        .case_insensitive(true)
        .build()
    else {
        out.push(text, false);
        return out;
    };

    let mut last = 0usize;
    for mat in re.find_iter(text) {
        if mat.start() == mat.end() {
            continue;
        }
        out.push(&text[last..mat.start()], false);
        out.push(mat.as_str(), true);
        last = mat.end();
    }
    out.push(&text[last..], false);
    out
}

pub fn derive(view: &ViewState, results: &ResultSet, input_text: &str) -> RenderModel {
    derive_with_policy(view, results, input_text, PopupPolicy::FocusOnly)
}

pub fn derive_with_policy(
    view: &ViewState,
    results: &ResultSet,
    input_text: &str,
    policy: PopupPolicy,
) -> RenderModel {
    let show_list = match policy {
        PopupPolicy::FocusOnly => view.popup_open,
        PopupPolicy::FocusWithResults => view.popup_open && !results.is_empty(),
    };
    let rows = results
        .items()
        .iter()
        .map(|item| RenderRow {
            name: highlight_keyword(&item.name, input_text),
            description: item.description.clone(),
        })
        .collect();

    RenderModel {
        result_count: results.len(),
        show_list,
        rows,
    }
}
