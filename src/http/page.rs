//! HTML rendering for the interaction page.
//!
//! Self-contained page: the question body in a `<pre>`, one POST form per
//! button (hidden `action` field), and one text-input form. All
//! interpolations are HTML-escaped. A terminated request renders a fixed
//! "Submitted." panel and no controls.

use crate::lifecycle::PageView;

const STYLE: &str = "\
body{font-family:system-ui,-apple-system,Segoe UI,Roboto,sans-serif;max-width:720px;margin:32px auto;padding:0 16px;}\
pre{white-space:pre-wrap;word-break:break-word;background:#f6f8fa;padding:12px;border-radius:8px;}\
.row{margin-top:16px;}\
button{padding:10px 14px;border-radius:10px;border:1px solid #d0d7de;background:#fff;cursor:pointer;margin:6px 6px 0 0;}\
button:hover{background:#f6f8fa;}\
input[type=\"text\"]{width:100%;padding:10px;border:1px solid #d0d7de;border-radius:10px;}\
.ok{padding:12px;border:1px solid #2da44e;border-radius:10px;background:#dafbe1;}";

/// Renders the page for a view and the plaintext token that gates it.
#[must_use]
pub fn render(view: &PageView, token_plain: &str) -> String {
    let title = escape(&view.title);
    let body = escape(&view.body);
    let submit_url = format!("./submit?k={}", urlencoding::encode(token_plain));
    let submit_url = escape(&submit_url);

    let mut html = String::with_capacity(2048);
    html.push_str("<!doctype html>\n<html>\n<head>\n");
    html.push_str("  <meta charset=\"utf-8\"/>\n");
    html.push_str("  <meta name=\"viewport\" content=\"width=device-width,initial-scale=1\"/>\n");
    html.push_str(&format!("  <title>{title}</title>\n"));
    html.push_str(&format!("  <style>{STYLE}</style>\n"));
    html.push_str("</head>\n<body>\n");
    html.push_str(&format!("  <h1>{title}</h1>\n"));
    html.push_str(&format!("  <pre>{body}</pre>\n"));

    if view.done {
        html.push_str("  <div class=\"ok\">Submitted.</div>\n");
    } else {
        if !view.controls.buttons.is_empty() {
            html.push_str("  <div class=\"row\">\n");
            for button in &view.controls.buttons {
                html.push_str(&format!(
                    "    <form method=\"post\" style=\"display:inline\" action=\"{submit_url}\">\n"
                ));
                html.push_str(&format!(
                    "      <input type=\"hidden\" name=\"action\" value=\"{}\"/>\n",
                    escape(&button.value)
                ));
                html.push_str(&format!(
                    "      <button type=\"submit\">{}</button>\n",
                    escape(&button.label)
                ));
                html.push_str("    </form>\n");
            }
            html.push_str("  </div>\n");
        }

        if let Some(input) = &view.controls.input {
            html.push_str("  <div class=\"row\">\n");
            html.push_str(&format!(
                "    <form method=\"post\" action=\"{submit_url}\">\n"
            ));
            html.push_str(&format!("      <label>{}</label>\n", escape(&input.label)));
            html.push_str("      <div style=\"height:8px\"></div>\n");
            html.push_str("      <input type=\"text\" name=\"text\" value=\"\"/>\n");
            html.push_str("      <div style=\"height:10px\"></div>\n");
            html.push_str(&format!(
                "      <button type=\"submit\">{}</button>\n",
                escape(&input.submit)
            ));
            html.push_str("    </form>\n");
            html.push_str("  </div>\n");
        }
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
