//! Text and PDF exports of a `ReportSummary`
//!
//! Both exports print the figures straight from the summary, so they always
//! agree with the JSON report. The PDF is a plain PDF 1.4 document with
//! Helvetica text lines in WinAnsiEncoding, so Latin-1 names print intact.

use crate::report::ReportSummary;

const LINES_PER_PAGE: usize = 50;
const FONT_SIZE: u32 = 10;
const LEADING: u32 = 14;
const PAGE_WIDTH: u32 = 595;
const PAGE_HEIGHT: u32 = 842;
const MARGIN: u32 = 50;

/// Plain-text report
pub fn render_text(summary: &ReportSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Uptime report: {}\n", summary.group_name));
    out.push_str(&format!(
        "Window: {} to {}\n",
        summary.window_start.to_rfc3339(),
        summary.window_end.to_rfc3339()
    ));
    out.push('\n');
    out.push_str(&format!("Uptime: {}%\n", summary.uptime_pct));
    out.push_str(&format!("Availability: {}\n", summary.tier));
    out.push_str(&format!("Average response: {} ms\n", summary.avg_response_ms));
    out.push_str(&format!("Incidents: {}\n", summary.incident_count));
    out.push_str(&format!("Checks: {}\n", summary.total_checks));

    if !summary.monitors.is_empty() {
        out.push_str("\nMonitors\n");
        for monitor in &summary.monitors {
            out.push_str(&format!(
                "  {} ({}): {}% uptime, {}/{} checks ok, {} ms avg, {} incidents\n",
                monitor.name,
                monitor.target,
                monitor.uptime_pct,
                monitor.successful_checks,
                monitor.total_checks,
                monitor.avg_response_ms,
                monitor.incidents.len()
            ));
        }
    }

    let incidents: Vec<_> = summary
        .monitors
        .iter()
        .flat_map(|m| m.incidents.iter().map(move |i| (m, i)))
        .collect();
    if !incidents.is_empty() {
        out.push_str("\nIncidents\n");
        for (monitor, incident) in incidents {
            let end = match (incident.closed_at, incident.duration_minutes) {
                (Some(closed), Some(minutes)) => {
                    format!("closed {} ({} min)", closed.to_rfc3339(), minutes)
                }
                _ => "ongoing".to_string(),
            };
            out.push_str(&format!(
                "  {}: opened {}, {}\n",
                monitor.name,
                incident.opened_at.to_rfc3339(),
                end
            ));
        }
    }
    out
}

/// Single-font PDF of the text report, paginated
pub fn render_pdf(summary: &ReportSummary) -> Vec<u8> {
    let text = render_text(summary);
    let lines: Vec<&str> = text.lines().collect();
    let pages: Vec<&[&str]> = if lines.is_empty() {
        vec![&lines[..]]
    } else {
        lines.chunks(LINES_PER_PAGE).collect()
    };

    // 1 catalog, 2 page tree, 3 font, then a page and a content stream per page
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| 4 + 2 * i).collect();
    let mut pdf = PdfWriter::new();

    pdf.object("<< /Type /Catalog /Pages 2 0 R >>");
    let kids: Vec<String> = page_ids.iter().map(|id| format!("{} 0 R", id)).collect();
    pdf.object(&format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        pages.len()
    ));
    pdf.object(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>",
    );

    for (page, id) in pages.iter().zip(&page_ids) {
        pdf.object(&format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            PAGE_WIDTH,
            PAGE_HEIGHT,
            id + 1
        ));
        pdf.stream(&content_stream(page));
    }

    pdf.finish()
}

fn content_stream(lines: &[&str]) -> String {
    let mut content = format!(
        "BT\n/F1 {} Tf\n{} TL\n{} {} Td\n",
        FONT_SIZE,
        LEADING,
        MARGIN,
        PAGE_HEIGHT - MARGIN
    );
    for line in lines {
        content.push_str(&format!("({}) Tj\nT*\n", escape(line)));
    }
    content.push_str("ET");
    content
}

/// Escape a PDF string literal for a WinAnsi font
///
/// Non-ASCII characters with a WinAnsi code are written as octal escapes;
/// anything else becomes '?'.
fn escape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => match win_ansi(c) {
                Some(code) => out.push_str(&format!("\\{:03o}", code)),
                None => out.push('?'),
            },
        }
    }
    out
}

/// WinAnsiEncoding code for a non-ASCII character
fn win_ansi(c: char) -> Option<u8> {
    match c {
        '\u{a0}'..='\u{ff}' => u8::try_from(u32::from(c)).ok(),
        '€' => Some(0x80),
        '‚' => Some(0x82),
        '„' => Some(0x84),
        '…' => Some(0x85),
        'Š' => Some(0x8a),
        'Œ' => Some(0x8c),
        'Ž' => Some(0x8e),
        '‘' => Some(0x91),
        '’' => Some(0x92),
        '“' => Some(0x93),
        '”' => Some(0x94),
        '•' => Some(0x95),
        '–' => Some(0x96),
        '—' => Some(0x97),
        '™' => Some(0x99),
        'š' => Some(0x9a),
        'œ' => Some(0x9c),
        'ž' => Some(0x9e),
        'Ÿ' => Some(0x9f),
        _ => None,
    }
}

struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl PdfWriter {
    fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"%PDF-1.4\n");
        Self {
            buf,
            offsets: Vec::new(),
        }
    }

    /// Append the next object; ids are assigned in call order from 1
    fn object(&mut self, body: &str) {
        self.offsets.push(self.buf.len());
        let id = self.offsets.len();
        self.buf
            .extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
    }

    fn stream(&mut self, content: &str) {
        self.object(&format!(
            "<< /Length {} >>\nstream\n{}\nendstream",
            content.len(),
            content
        ));
    }

    fn finish(mut self) -> Vec<u8> {
        let xref_offset = self.buf.len();
        let size = self.offsets.len() + 1;
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", size);
        for offset in &self.offsets {
            xref.push_str(&format!("{:010} 00000 n \n", offset));
        }
        xref.push_str(&format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            size, xref_offset
        ));
        self.buf.extend_from_slice(xref.as_bytes());
        self.buf
    }
}
