use std::fmt::Write;

use crate::pipeline::DetectionSummary;
use crate::record::DetectionRecord;

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse}\
td,th{border:1px solid #999;padding:4px 8px}\
th{background:#eee}";

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title><style>{STYLE}</style></head>\n\
         <body>\n<h1>{title}</h1>\n{body}\n\
         <p><a href=\"/\">Upload</a> | <a href=\"/live_feed\">Live feed</a> | <a href=\"/detected_dents\">Detection log</a></p>\n\
         </body>\n</html>\n",
        title = escape(title),
    )
}

pub fn index_page() -> String {
    page(
        "Car Damage Detection",
        "<form action=\"/upload\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <input type=\"file\" name=\"file\" accept=\".png,.jpg,.jpeg,.mp4\">\n\
         <input type=\"submit\" value=\"Detect\">\n\
         </form>\n\
         <h2>Live camera</h2>\n<img src=\"/live_feed\" alt=\"live feed\" width=\"640\">",
    )
}

fn records_table(records: &[DetectionRecord]) -> String {
    if records.is_empty() {
        return "<p>No detections yet.</p>".to_string();
    }
    let mut table = String::from(
        "<table>\n<tr><th>#</th><th>Type</th><th>Confidence</th><th>Timestamp</th><th>Source</th></tr>\n",
    );
    for (index, record) in records.iter().enumerate() {
        let _ = writeln!(
            table,
            "<tr><td>{}</td><td>{}</td><td>{:.2}</td><td>{}</td><td>{}</td></tr>",
            index + 1,
            escape(record.kind.name()),
            record.confidence,
            escape(&record.timestamp),
            escape(&record.file_path.to_string()),
        );
    }
    table.push_str("</table>");
    table
}

/// How the annotated output should be embedded.
pub enum OutputMedia<'a> {
    Image { url: &'a str },
    Video { url: &'a str },
}

pub fn result_page(output_path: &str, media: OutputMedia, records: &[DetectionRecord]) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "<p>Annotated output: <code>{}</code></p>", escape(output_path));
    match media {
        OutputMedia::Image { url } => {
            let _ = writeln!(body, "<img src=\"{}\" alt=\"annotated output\" style=\"max-width:100%\">", escape(url));
        }
        OutputMedia::Video { url } => {
            let _ = writeln!(
                body,
                "<video src=\"{}\" controls style=\"max-width:100%\"></video>",
                escape(url)
            );
        }
    }
    body.push_str("<h2>Detected damage</h2>\n");
    body.push_str(&records_table(records));
    page("Detection Result", &body)
}

pub fn log_page(records: &[DetectionRecord], summary: &DetectionSummary) -> String {
    let mut body = String::from("<h2>Summary</h2>\n<table>\n<tr><th>Type</th><th>Count</th></tr>\n");
    for (kind, count) in summary.iter().filter(|(_, count)| **count > 0) {
        let _ = writeln!(body, "<tr><td>{}</td><td>{}</td></tr>", escape(kind.name()), count);
    }
    body.push_str("</table>\n<h2>All detections</h2>\n");
    body.push_str(&records_table(records));
    page("Detected Dents", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::summarize_records;
    use crate::record::{DamageKind, Origin};

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_log_page_lists_records_in_order() {
        let records = vec![
            DetectionRecord::new(DamageKind::BootDent, 0.5, Origin::LiveFeed),
            DetectionRecord::new(DamageKind::RoofDent, 0.91, Origin::LiveFeed),
        ];
        let html = log_page(&records, &summarize_records(&records));
        let boot = html.find("<td>boot-dent</td><td>0.50</td>").unwrap();
        let roof = html.find("<td>roof-dent</td><td>0.91</td>").unwrap();
        assert!(boot < roof);
        assert!(html.contains("<td>live_feed</td>"));
        assert!(!html.contains("<td>pillar-dent</td>"));
    }

    #[test]
    fn test_result_page_embeds_output() {
        let html = result_page(
            "static/uploads/output_a.mp4",
            OutputMedia::Video { url: "/static/uploads/output_a.mp4" },
            &[],
        );
        assert!(html.contains("<video src=\"/static/uploads/output_a.mp4\""));
        assert!(html.contains("No detections yet."));
    }
}
