//! Plain-text rendering of conversations

use std::io::Write;

use retcon_core::Citation;
use retcon_core::Conversation;
use retcon_core::ConversationSummary;
use retcon_core::Message;

use crate::ids::short_id;

pub fn summary_line(out: &mut impl Write, summary: &ConversationSummary) -> std::io::Result<()> {
    writeln!(
        out,
        "{}  {}  {:>3} msgs  {}",
        short_id(summary.id),
        summary.updated_at.format("%Y-%m-%d %H:%M"),
        summary.message_count,
        summary.title
    )
}

pub fn conversation(out: &mut impl Write, conversation: &Conversation) -> std::io::Result<()> {
    writeln!(out, "{} ({})", conversation.title, conversation.id)?;
    for message in &conversation.messages {
        writeln!(out)?;
        self::message(out, message)?;
    }
    Ok(())
}

pub fn message(out: &mut impl Write, message: &Message) -> std::io::Result<()> {
    write!(out, "[{}] {}", message.role.as_str(), short_id(message.id))?;
    if message.version_count() > 1 {
        write!(
            out,
            " [version {}/{}]",
            message.active_version() + 1,
            message.version_count()
        )?;
    }
    if message.streaming {
        write!(out, " (generating)")?;
    }
    if let Some(kind) = message.error {
        write!(out, " (error: {kind})")?;
    }
    writeln!(out)?;

    if !message.content.text.is_empty() {
        writeln!(out, "{}", message.content.text)?;
    }
    for image in &message.content.images {
        writeln!(out, "  [image: {}]", image.mime_type)?;
    }
    citations(out, &message.citations)
}

pub fn citations(out: &mut impl Write, citations: &[Citation]) -> std::io::Result<()> {
    if citations.is_empty() {
        return Ok(());
    }
    writeln!(out, "Sources:")?;
    for (n, citation) in citations.iter().enumerate() {
        match &citation.title {
            Some(title) => writeln!(out, "  [{}] {title} - {}", n + 1, citation.uri)?,
            None => writeln!(out, "  [{}] {}", n + 1, citation.uri)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use retcon_core::Content;
    use retcon_core::Navigator;

    fn render(conversation: &Conversation) -> String {
        let mut out = Vec::new();
        self::conversation(&mut out, conversation).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_version_markers_only_on_edited_messages() {
        let mut conversation = Conversation::new(None);
        Navigator::new(&mut conversation, false)
            .append(Content::text("hello"))
            .unwrap();
        let reply = conversation.messages.last_mut().unwrap();
        reply.streaming = false;
        reply.content = Content::text("hi there");
        reply.citations.push(Citation {
            uri: "https://example.com/greetings".to_string(),
            title: Some("example.com".to_string()),
        });

        let first = conversation.messages[0].id;
        Navigator::new(&mut conversation, false)
            .fork(first, Content::text("hello again"))
            .unwrap();

        let text = render(&conversation);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], format!("hello ({})", conversation.id));
        assert!(lines[2].starts_with("[user] "));
        assert!(lines[2].ends_with(" [version 2/2]"));
        assert_eq!(lines[3], "hello again");
        assert!(lines[5].starts_with("[assistant] "));
        assert!(lines[5].ends_with(" (generating)"));
        assert!(!text.contains("Sources:"));
    }

    #[test]
    fn test_citations_are_numbered() {
        let mut out = Vec::new();
        citations(
            &mut out,
            &[
                Citation {
                    uri: "https://a.example".to_string(),
                    title: Some("a.example".to_string()),
                },
                Citation {
                    uri: "https://b.example".to_string(),
                    title: None,
                },
            ],
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Sources:\n  [1] a.example - https://a.example\n  [2] https://b.example\n"
        );
    }
}
