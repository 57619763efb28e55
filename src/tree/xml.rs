//! XML codec for job trees, built on quick-xml.
//!
//! Text is kept verbatim where it appears: before the first child in
//! `Element::text`, after a child in that child's `tail`. Whitespace-only runs
//! (indentation) are discarded. Comments, processing instructions and the XML
//! declaration are ignored.

use super::{Element, TreeError};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Write;

/// Parse a single-rooted XML document into an element tree.
pub fn parse(input: &str) -> Result<Element, TreeError> {
    let mut reader = Reader::from_str(input);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let position = reader.buffer_position();
        let xml_err = |message: String| TreeError::Xml { position, message };

        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(element_from_start(&e).map_err(xml_err)?),
            Ok(Event::Empty(e)) => {
                let element = element_from_start(&e).map_err(xml_err)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| xml_err("Unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| xml_err(e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    append_text(top, &text);
                }
            }
            Ok(Event::CData(c)) => {
                let bytes = c.into_inner();
                if let Some(top) = stack.last_mut() {
                    append_text(top, &String::from_utf8_lossy(&bytes));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(xml_err(e.to_string())),
        }
    }

    if let Some(open) = stack.pop() {
        return Err(TreeError::Unclosed(open.tag));
    }
    root.ok_or(TreeError::Empty)
}

/// Serialize an element tree to compact XML.
pub fn write(element: &Element) -> Result<String, TreeError> {
    let mut writer = Writer::new(Vec::new());
    write_element(&mut writer, element)?;
    String::from_utf8(writer.into_inner()).map_err(|e| TreeError::Xml {
        position: e.utf8_error().valid_up_to(),
        message: e.to_string(),
    })
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, String> {
    let tag = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| e.to_string())?
        .to_string();
    let mut element = Element::new(tag);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        element.set(key, value.into_owned());
    }
    Ok(element)
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), TreeError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(TreeError::MultipleRoots),
    }
}

/// Add a text run to `element`: its own text if no child has been seen yet,
/// otherwise the tail of the last child.
fn append_text(element: &mut Element, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    let slot = match element.children.last_mut() {
        Some(last) => &mut last.tail,
        None => &mut element.text,
    };
    match slot.as_mut() {
        Some(existing) => existing.push_str(text),
        None => *slot = Some(text.to_string()),
    }
}

fn write_element<W: Write>(writer: &mut Writer<W>, element: &Element) -> Result<(), TreeError> {
    let io_err = |e: quick_xml::Error| TreeError::Xml {
        position: 0,
        message: e.to_string(),
    };

    let mut start = BytesStart::new(element.tag.as_str());
    for (key, value) in element.attrs() {
        start.push_attribute((key, value));
    }

    if element.text.is_none() && element.children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(io_err);
    }

    writer.write_event(Event::Start(start)).map_err(io_err)?;
    if let Some(text) = &element.text {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(io_err)?;
    }
    for child in &element.children {
        write_element(writer, child)?;
        if let Some(tail) = &child.tail {
            writer
                .write_event(Event::Text(BytesText::new(tail)))
                .map_err(io_err)?;
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.tag.as_str())))
        .map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<job id="J1">
  <source id="S1" href="/data/box1" name="Box 1">
    <document id="D1">
      <page id="P1" name="0001">
        <data path="imgs" filename="0001.tif"/>
        <text>Tom &amp; Jerry</text>
      </page>
    </document>
  </source>
</job>"#;

    #[test]
    fn test_parse_structure() {
        let root = parse(SAMPLE).unwrap();
        assert_eq!(root.tag, "job");
        let source = root.child("source").unwrap();
        assert_eq!(source.get("href"), Some("/data/box1"));
        let page = source.child("document").unwrap().child("page").unwrap();
        assert_eq!(page.get("name"), Some("0001"));
        assert_eq!(
            page.child("text").unwrap().text.as_deref(),
            Some("Tom & Jerry")
        );
    }

    #[test]
    fn test_write_is_stable_after_reparse() {
        let first = write(&parse(SAMPLE).unwrap()).unwrap();
        let second = write(&parse(&first).unwrap()).unwrap();
        assert_eq!(first, second);
        assert!(first.contains(r#"<data path="imgs" filename="0001.tif"/>"#));
        assert!(first.contains("Tom &amp; Jerry"));
    }

    #[test]
    fn test_attribute_escaping() {
        let el = Element::new("source").with_attr("name", "a \"quoted\" <name>");
        let xml = write(&el).unwrap();
        let back = parse(&xml).unwrap();
        assert_eq!(back.get("name"), Some("a \"quoted\" <name>"));
    }

    #[test]
    fn test_mixed_content_round_trip() {
        let input = r#"<job id="J1"><source id="S1"><document id="D1"><page id="P1"><text>Hello <b>big</b> world</text></page></document></source></job>"#;
        let text = parse(input).unwrap();
        let text = text.descendants().find(|e| e.is("text")).unwrap();
        assert_eq!(text.text.as_deref(), Some("Hello "));
        assert_eq!(text.children[0].tail.as_deref(), Some(" world"));
        assert_eq!(write(&parse(input).unwrap()).unwrap(), input);
    }

    #[test]
    fn test_indented_text_is_kept_verbatim() {
        let input = "<job><text>  indented line\n  second</text><text>a<b/>\n  tail </text></job>";
        assert_eq!(write(&parse(input).unwrap()).unwrap(), input);
    }

    #[test]
    fn test_indentation_between_elements_is_dropped() {
        let root = parse(SAMPLE).unwrap();
        assert!(root.text.is_none());
        assert!(root.descendants().all(|e| e.tail.is_none()));
    }

    #[test]
    fn test_unclosed_element() {
        assert!(parse("<job><source>").is_err());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse("   ").unwrap_err(), TreeError::Empty);
    }

    #[test]
    fn test_multiple_roots() {
        assert_eq!(parse("<a/><b/>").unwrap_err(), TreeError::MultipleRoots);
    }
}
