//! Pure rendering of a `Book` back to prose (spec.md §6 Sink).
//!
//! Chapters are separated by a heading line; paragraphs within a chapter are
//! separated by a blank line. This is the inverse of the (out-of-scope,
//! spec.md §1) parser: it never re-derives structure, only serializes it.

use crate::data::{Book, ChapterNumber};

pub fn render(book: &Book) -> String {
    let mut out = String::new();

    for chapter in &book.chapters {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&chapter_heading(&chapter.number, chapter.title.as_deref()));
        out.push_str("\n\n");

        let bodies: Vec<String> = chapter.paragraphs.iter().map(|p| p.text()).collect();
        out.push_str(&bodies.join("\n\n"));
    }

    out
}

fn chapter_heading(number: &ChapterNumber, title: Option<&str>) -> String {
    match title {
        Some(title) => format!("Chapter {number}: {title}"),
        None => format!("Chapter {number}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BookMetadata, Chapter, Paragraph};

    #[test]
    fn renders_chapter_heading_and_blank_line_separated_paragraphs() {
        let book = Book {
            metadata: BookMetadata::default(),
            chapters: vec![Chapter {
                number: ChapterNumber::Ordinal(1),
                title: Some("Beginnings".to_string()),
                paragraphs: vec![
                    Paragraph::new(vec!["First sentence.".to_string()]),
                    Paragraph::new(vec!["Second paragraph.".to_string()]),
                ],
            }],
        };

        let rendered = render(&book);
        assert!(rendered.starts_with("Chapter 1: Beginnings"));
        assert!(rendered.contains("First sentence.\n\nSecond paragraph."));
    }

    #[test]
    fn renders_untitled_chapter_without_colon() {
        let book = Book {
            metadata: BookMetadata::default(),
            chapters: vec![Chapter {
                number: ChapterNumber::Label("Prologue".to_string()),
                title: None,
                paragraphs: vec![Paragraph::new(vec!["Text.".to_string()])],
            }],
        };
        let rendered = render(&book);
        assert_eq!(rendered, "Chapter Prologue\n\nText.");
    }
}
