use scraper::{ElementRef, Html, Selector};

use crate::models::FormPayload;

const SNIPPET_CHARS: usize = 200;
const NON_DATA_INPUTS: [&str; 4] = ["submit", "button", "image", "reset"];
const NON_TEXT_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Which form to harvest: the one carrying a submit control
/// `name=command_field` with one of `command_values`.
#[derive(Debug, Clone, Copy)]
pub struct FormSpec<'a> {
    pub command_field: &'a str,
    pub command_values: &'a [String],
}

/// Fields harvested from an application page, command already filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationForm {
    pub fields: FormPayload,
    pub command: String,
}

impl ApplicationForm {
    /// Present and non-empty.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .is_some_and(|value| !value.trim().is_empty())
    }
}

/// Find the application form in `html` and build its submission payload.
///
/// Every named `input` (except buttons), `textarea` and `select` contributes
/// a field; missing values become empty strings. The command field is then
/// set to the value of the matching submit control.
pub fn extract_form_fields(html: &str, spec: FormSpec<'_>) -> Option<ApplicationForm> {
    let document = Html::parse_document(html);
    let form_selector = Selector::parse("form").ok()?;
    let control_selector =
        Selector::parse("button[name], input[type=submit][name], input[type=image][name]").ok()?;

    document.select(&form_selector).find_map(|form| {
        let command = form
            .select(&control_selector)
            .filter(|control| control.value().attr("name") == Some(spec.command_field))
            .filter_map(|control| control.value().attr("value"))
            .find(|value| {
                spec.command_values
                    .iter()
                    .any(|accepted| accepted.as_str() == *value)
            })?
            .to_string();

        let mut fields = harvest_fields(form)?;
        fields.insert(spec.command_field.to_string(), command.clone());
        Some(ApplicationForm { fields, command })
    })
}

fn harvest_fields(form: ElementRef<'_>) -> Option<FormPayload> {
    let input_selector = Selector::parse("input[name]").ok()?;
    let textarea_selector = Selector::parse("textarea[name]").ok()?;
    let select_selector = Selector::parse("select[name]").ok()?;
    let option_selector = Selector::parse("option").ok()?;

    let mut fields = FormPayload::new();

    for input in form.select(&input_selector) {
        let element = input.value();
        let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
        if NON_DATA_INPUTS.contains(&kind.as_str()) {
            continue;
        }
        let Some(name) = element.attr("name") else {
            continue;
        };
        // Unchecked boxes and radios are not part of the submitted form.
        let value = match kind.as_str() {
            "checkbox" | "radio" if element.attr("checked").is_none() => continue,
            "checkbox" => element.attr("value").unwrap_or("on"),
            _ => element.attr("value").unwrap_or(""),
        };
        fields.insert(name.to_string(), value.to_string());
    }

    for textarea in form.select(&textarea_selector) {
        if let Some(name) = textarea.value().attr("name") {
            fields.insert(name.to_string(), textarea.text().collect::<String>());
        }
    }

    for select in form.select(&select_selector) {
        let Some(name) = select.value().attr("name") else {
            continue;
        };
        let options: Vec<ElementRef<'_>> = select.select(&option_selector).collect();
        let chosen = options
            .iter()
            .find(|option| option.value().attr("selected").is_some())
            .or_else(|| options.first())
            .map(|option| {
                option
                    .value()
                    .attr("value")
                    .map(str::to_string)
                    .unwrap_or_else(|| option.text().collect::<String>().trim().to_string())
            })
            .unwrap_or_default();
        fields.insert(name.to_string(), chosen);
    }

    Some(fields)
}

/// Visible text of an HTML page with whitespace collapsed.
///
/// Only the `body` counts; script, style and noscript contents are skipped.
pub fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(body_selector) = Selector::parse("body") else {
        return String::new();
    };
    let Some(body) = document.select(&body_selector).next() else {
        return String::new();
    };

    body.descendants()
        .filter(|node| {
            !node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|element| NON_TEXT_ELEMENTS.contains(&element.name()))
            })
        })
        .filter_map(|node| node.value().as_text())
        .flat_map(|text| text.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The first confirmation phrase found in the page text, compared case-insensitively.
pub fn confirmation_phrase<'a>(page_text: &str, phrases: &'a [String]) -> Option<&'a str> {
    let haystack = page_text.to_lowercase();
    phrases
        .iter()
        .find(|phrase| !phrase.is_empty() && haystack.contains(&phrase.to_lowercase()))
        .map(String::as_str)
}

/// Leading part of a raw response body, kept for diagnostics.
pub fn snippet(body: &str) -> String {
    let body = body.trim();
    let mut snippet: String = body.chars().take(SNIPPET_CHARS).collect();
    if body.chars().count() > SNIPPET_CHARS {
        snippet.push('…');
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    const APPLICATION_PAGE: &str = r#"
        <html><body>
          <form action="/zoeken" method="get">
            <input name="q" value="rotterdam">
            <button name="Command" value="zoek">Zoek</button>
          </form>
          <form action="/reageren/123" method="post">
            <input type="hidden" name="__RequestVerificationToken" value="tok-42">
            <input type="hidden" name="Id" value="123">
            <input type="text" name="Opmerking">
            <textarea name="Motivatie">Graag</textarea>
            <select name="Inkomen">
              <option value="laag">laag</option>
              <option value="midden" selected>midden</option>
            </select>
            <input type="submit" name="Annuleren" value="Annuleren">
            <button type="submit" name="Command" value="plaats-einkomen">Reageer</button>
          </form>
        </body></html>
    "#;

    fn commands() -> Vec<String> {
        vec!["plaats-einkomen".to_string(), "plaats".to_string()]
    }

    #[test]
    fn harvests_the_form_with_the_known_command() {
        let commands = commands();
        let form = extract_form_fields(
            APPLICATION_PAGE,
            FormSpec {
                command_field: "Command",
                command_values: &commands,
            },
        )
        .expect("form found");

        assert_eq!(form.command, "plaats-einkomen");
        assert_eq!(form.fields["Command"], "plaats-einkomen");
        assert_eq!(form.fields["__RequestVerificationToken"], "tok-42");
        assert_eq!(form.fields["Opmerking"], "");
        assert_eq!(form.fields["Motivatie"], "Graag");
        assert_eq!(form.fields["Inkomen"], "midden");
        assert!(!form.fields.contains_key("q"));
        assert!(!form.fields.contains_key("Annuleren"));
        assert!(form.has_field("__RequestVerificationToken"));
    }

    #[test]
    fn missing_command_control_means_no_form() {
        let commands = commands();
        let html = r#"<form><input name="__RequestVerificationToken" value="x"></form>"#;
        assert!(extract_form_fields(
            html,
            FormSpec {
                command_field: "Command",
                command_values: &commands,
            },
        )
        .is_none());
    }

    #[test]
    fn form_without_token_is_still_extracted() {
        let commands = commands();
        let html = r#"<form><input name="Id" value="9"><button name="Command" value="plaats"></button></form>"#;
        let form = extract_form_fields(
            html,
            FormSpec {
                command_field: "Command",
                command_values: &commands,
            },
        )
        .expect("form found");
        assert!(!form.has_field("__RequestVerificationToken"));
    }

    #[test]
    fn confirmation_is_matched_on_page_text() {
        let phrases = vec!["Uw reactie is verwerkt".to_string()];
        let text = page_text("<html><body><h1>Bedankt</h1><p>Uw  reactie\n is <b>verwerkt</b>.</p></body></html>");
        assert_eq!(
            confirmation_phrase(&text, &phrases),
            Some("Uw reactie is verwerkt")
        );
        assert_eq!(confirmation_phrase("Er is iets misgegaan", &phrases), None);
    }

    #[test]
    fn script_text_does_not_count_as_confirmation() {
        let phrases = vec!["Uw reactie is verwerkt".to_string()];
        let text = page_text(
            r#"<script>var msg={ok:"Uw reactie is verwerkt"};</script><body><h1>Er is een fout opgetreden</h1></body>"#,
        );
        assert_eq!(text, "Er is een fout opgetreden");
        assert_eq!(confirmation_phrase(&text, &phrases), None);

        let inline = page_text(
            r#"<body><noscript>Uw reactie is verwerkt</noscript><style>p{}</style><p>Fout</p><script>"Uw reactie is verwerkt"</script></body>"#,
        );
        assert_eq!(inline, "Fout");
    }

    #[test]
    fn only_checked_choices_are_harvested() {
        let commands = commands();
        let html = r#"<form>
            <input type="hidden" name="__RequestVerificationToken" value="tok">
            <input type="radio" name="Inkomen" value="laag" checked>
            <input type="radio" name="Inkomen" value="hoog">
            <input type="checkbox" name="Huisdieren" value="ja">
            <input type="checkbox" name="Akkoord" checked>
            <input type="checkbox" name="Roker" value="nee" CHECKED>
            <button name="Command" value="plaats">Reageer</button>
        </form>"#;
        let form = extract_form_fields(
            html,
            FormSpec {
                command_field: "Command",
                command_values: &commands,
            },
        )
        .expect("form found");

        assert_eq!(form.fields.get("Inkomen").map(String::as_str), Some("laag"));
        assert!(!form.fields.contains_key("Huisdieren"));
        assert_eq!(form.fields.get("Akkoord").map(String::as_str), Some("on"));
        assert_eq!(form.fields.get("Roker").map(String::as_str), Some("nee"));
    }

    #[test]
    fn snippet_is_truncated() {
        let long = "a".repeat(500);
        let cut = snippet(&long);
        assert_eq!(cut.chars().count(), SNIPPET_CHARS + 1);
        assert!(cut.ends_with('…'));
        assert_eq!(snippet("kort"), "kort");
    }
}
