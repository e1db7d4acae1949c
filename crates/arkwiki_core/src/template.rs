const ITEM_LIST_HEAD: &str = "{{ItemList|noDlcIcon = 1";
const ITEM_LIST_TAIL: &str = "}}";

/// Render `{{ItemList|noDlcIcon = 1|t1|...|tN}}`.
///
/// Titles are inserted verbatim. A title containing `|`, `{{` or `}}` breaks
/// the template; see [`unsafe_template_titles`].
pub fn render_item_list<S: AsRef<str>>(titles: &[S]) -> String {
    let mut rendered = String::from(ITEM_LIST_HEAD);
    for title in titles {
        rendered.push('|');
        rendered.push_str(title.as_ref());
    }
    rendered.push_str(ITEM_LIST_TAIL);
    rendered
}

/// Titles that would corrupt the rendered template.
pub fn unsafe_template_titles<S: AsRef<str>>(titles: &[S]) -> Vec<&str> {
    titles
        .iter()
        .map(|title| title.as_ref())
        .filter(|title| title.contains('|') || title.contains("{{") || title.contains("}}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_titles_in_order() {
        assert_eq!(
            render_item_list(&["A", "B", "C"]),
            "{{ItemList|noDlcIcon = 1|A|B|C}}"
        );
        assert_eq!(
            render_item_list(&["Mod:Primal Fear/Apex Meat".to_string()]),
            "{{ItemList|noDlcIcon = 1|Mod:Primal Fear/Apex Meat}}"
        );
    }

    #[test]
    fn empty_list_has_no_dangling_separator() {
        let empty: [&str; 0] = [];
        assert_eq!(render_item_list(&empty), "{{ItemList|noDlcIcon = 1}}");
    }

    #[test]
    fn flags_titles_that_break_the_template() {
        let titles = ["Stone", "A|B", "{{Oops", "Tail}}", "Mod:Fine/Item"];
        assert_eq!(unsafe_template_titles(&titles), vec!["A|B", "{{Oops", "Tail}}"]);
    }
}
