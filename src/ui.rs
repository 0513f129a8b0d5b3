use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use crate::app::{App, Popup};
use crate::conversation::{Author, ChatEntry, PENDING_CAPTION};

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const PLACEHOLDER: &str = "Escribe un mensaje...";

/// Render `**bold**` spans; an unmatched `**` stays literal.
fn styled_reply_line(text: &str) -> Line<'static> {
    let segments: Vec<&str> = text.split("**").collect();
    let unmatched_tail = segments.len() % 2 == 0;
    let last = segments.len() - 1;

    let mut spans = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        let inside_markers = i % 2 == 1;
        if inside_markers && unmatched_tail && i == last {
            spans.push(Span::raw(format!("**{segment}")));
        } else if segment.is_empty() {
            continue;
        } else if inside_markers {
            spans.push(Span::styled(
                segment.to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            ));
        } else {
            spans.push(Span::raw(segment.to_string()));
        }
    }

    Line::from(spans)
}

/// Word-wrap styled spans into rows of at most `width` columns.
///
/// Whitespace runs collapse to a single space. A word wider than a whole row
/// is broken by character. Always returns at least one (possibly empty) row.
fn wrap_spans(spans: &[Span<'static>], width: usize) -> Vec<Vec<Span<'static>>> {
    let width = width.max(1);

    // A word may cross span boundaries, e.g. `**hola**,`
    let mut words: Vec<Vec<Span<'static>>> = Vec::new();
    let mut word: Vec<Span<'static>> = Vec::new();
    for span in spans {
        let mut piece = String::new();
        for c in span.content.chars() {
            if c.is_whitespace() {
                if !piece.is_empty() {
                    word.push(Span::styled(std::mem::take(&mut piece), span.style));
                }
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            } else {
                piece.push(c);
            }
        }
        if !piece.is_empty() {
            word.push(Span::styled(piece, span.style));
        }
    }
    if !word.is_empty() {
        words.push(word);
    }

    let mut rows = Vec::new();
    let mut row: Vec<Span<'static>> = Vec::new();
    let mut row_width = 0;
    for word in words {
        let word_width: usize = word.iter().map(Span::width).sum();
        if row_width > 0 && row_width + 1 + word_width <= width {
            row.push(Span::raw(" "));
            row_width += 1;
        } else if row_width > 0 {
            rows.push(std::mem::take(&mut row));
            row_width = 0;
        }

        if word_width <= width {
            row.extend(word);
            row_width += word_width;
            continue;
        }

        for span in word {
            for c in span.content.chars() {
                let mut buf = [0; 4];
                let c_width = Span::raw(&*c.encode_utf8(&mut buf)).width();
                if row_width > 0 && row_width + c_width > width {
                    rows.push(std::mem::take(&mut row));
                    row_width = 0;
                }
                push_char(&mut row, c, span.style);
                row_width += c_width;
            }
        }
    }
    if !row.is_empty() || rows.is_empty() {
        rows.push(row);
    }
    rows
}

fn push_char(row: &mut Vec<Span<'static>>, c: char, style: Style) {
    match row.last_mut() {
        Some(last) if last.style == style => last.content.to_mut().push(c),
        _ => row.push(Span::styled(c.to_string(), style)),
    }
}

/// One bubble per entry, oldest first, already wrapped to `width` columns so
/// every returned line is exactly one screen row.
///
/// Pure: same entries, frame and width, same lines.
pub fn bubble_lines(entries: &[ChatEntry], spinner_frame: usize, width: u16) -> Vec<Line<'static>> {
    let width = usize::from(width);
    let user_label = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let user_bubble = Style::default().fg(Color::White).bg(Color::Blue);
    let assistant_label = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);

    let mut lines = Vec::new();
    for entry in entries {
        match entry.author {
            Author::User => {
                lines.push(Line::from(Span::styled("Tú", user_label)).alignment(Alignment::Right));
                // Two columns go to the bubble's padding
                for line in entry.text.lines() {
                    for row in wrap_spans(&[Span::raw(line.to_string())], width.saturating_sub(2)) {
                        let text: String = row.iter().map(|s| s.content.as_ref()).collect();
                        lines.push(
                            Line::from(Span::styled(format!(" {text} "), user_bubble))
                                .alignment(Alignment::Right),
                        );
                    }
                }
            }
            Author::Assistant => {
                lines.push(Line::from(Span::styled("Gemini", assistant_label)));
                if entry.pending {
                    let frame = SPINNER[spinner_frame % SPINNER.len()];
                    let spans = [
                        Span::styled(frame, Style::default().fg(Color::Yellow)),
                        Span::raw(" "),
                        Span::styled(
                            PENDING_CAPTION,
                            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                        ),
                    ];
                    lines.extend(wrap_spans(&spans, width).into_iter().map(Line::from));
                } else {
                    for line in entry.text.lines() {
                        let styled = styled_reply_line(line);
                        lines.extend(wrap_spans(&styled.spans, width).into_iter().map(Line::from));
                    }
                }
            }
        }
        lines.push(Line::default());
    }
    lines
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    match app.popup {
        Popup::None => {}
        Popup::MissingCredential => render_missing_credential(frame, area),
        Popup::ApiKeyEntry { .. } => render_api_key_input(app, frame, area),
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let key_indicator = match app.key_source {
        Some(source) => format!(" [key: {source}]"),
        None => String::new(),
    };

    let title = Line::from(vec![
        Span::styled(" Gemini Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(app.model.clone(), Style::default().fg(Color::White)),
        Span::styled(key_indicator, Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);

    // Lines come back pre-wrapped, so the line count is the row count
    let lines = bubble_lines(app.conversation.entries(), app.spinner_frame, inner.width);
    let total = u16::try_from(lines.len()).unwrap_or(u16::MAX);
    app.update_chat_metrics(total, inner.height);

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let sending = app.is_sending();
    let (title, border_color) = if sending {
        (" Enviando... ", Color::DarkGray)
    } else {
        (" Enviar (Enter) ", Color::Yellow)
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Keep the cursor in view by scrolling the text horizontally
    let inner_width = usize::from(area.width.saturating_sub(2));
    let cursor_pos = app.cursor;
    let scroll_offset = if inner_width == 0 || cursor_pos < inner_width {
        0
    } else {
        cursor_pos - inner_width + 1
    };

    let draft = app.conversation.draft();
    let input = if draft.is_empty() {
        Paragraph::new(PLACEHOLDER).style(Style::default().fg(Color::DarkGray))
    } else {
        let visible_text: String = draft.chars().skip(scroll_offset).take(inner_width).collect();
        let color = if sending { Color::DarkGray } else { Color::Cyan };
        Paragraph::new(visible_text).style(Style::default().fg(color))
    };

    frame.render_widget(input.block(input_block), area);

    if !sending && app.popup == Popup::None {
        let cursor_x = u16::try_from(cursor_pos - scroll_offset).unwrap_or(0);
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let line = match &app.status_message {
        Some(message) => Line::from(Span::styled(
            format!(" {message}"),
            Style::default().fg(Color::Green),
        )),
        None => Line::from(vec![
            Span::styled(" Enter", Style::default().fg(Color::Yellow)),
            Span::raw(" enviar  "),
            Span::styled("↑↓ PgUp PgDn", Style::default().fg(Color::Yellow)),
            Span::raw(" desplazar  "),
            Span::styled("Ctrl+K", Style::default().fg(Color::Yellow)),
            Span::raw(" API Key  "),
            Span::styled("Ctrl+C", Style::default().fg(Color::Yellow)),
            Span::raw(" salir"),
        ]),
    };

    frame.render_widget(Paragraph::new(line).style(Style::default().fg(Color::Gray)), area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height);
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width, height)
}

fn render_missing_credential(frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 60, 7);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" Error ");

    let text = Text::from(vec![
        Line::from("API Key no encontrada."),
        Line::from(format!(
            "Configura {} o guárdala en el archivo de configuración.",
            crate::config::API_KEY_ENV
        )),
        Line::default(),
        Line::from(Span::styled(
            "Enter: introducir clave   Esc: cerrar",
            Style::default().fg(Color::DarkGray),
        )),
    ]);

    let notice = Paragraph::new(text).block(block).wrap(Wrap { trim: true });
    frame.render_widget(notice, popup_area);
}

fn render_api_key_input(app: &App, frame: &mut Frame, area: Rect) {
    let Popup::ApiKeyEntry { input, .. } = &app.popup else {
        return;
    };

    let popup_area = centered(area, 60, 7);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" API Key de Gemini ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Pega tu clave. Enter para guardar, Esc para cancelar.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    // Mask the key, leaving the last four characters visible
    let char_count = input.chars().count();
    let display_text = if char_count <= 4 {
        "*".repeat(char_count)
    } else {
        let masked_len = char_count - 4;
        let last_four: String = input.chars().skip(masked_len).collect();
        format!("{}...{}", "*".repeat(masked_len.min(20)), last_four)
    };

    let display_width = display_text.chars().count();
    let input_area = Rect::new(inner.x, inner.y.saturating_add(2), inner.width, 1);
    frame.render_widget(
        Paragraph::new(display_text).style(Style::default().fg(Color::Cyan)),
        input_area,
    );

    // Typing only ever appends, so the cursor sits at the end of the mask
    let cursor_x = u16::try_from(display_width)
        .unwrap_or(u16::MAX)
        .min(input_area.width.saturating_sub(1));
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));

    let status = Paragraph::new(format!("{char_count} caracteres"))
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(status, Rect::new(inner.x, inner.y.saturating_add(4), inner.width, 1));
}
