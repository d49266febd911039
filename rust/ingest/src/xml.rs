//! SAX-style `<page>` splitter over the decompressed dump.
//!
//! Never buffers more than one page. Unknown child elements are skipped;
//! all namespaces pass through (downstream filters decide). The only
//! fatal condition is a malformed or truncated stream.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tokio::io::{AsyncBufRead, BufReader};
use tome_error::{ErrorCodes, TomeError};
use tome_types::RawPage;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("malformed xml: {0}")]
    Malformed(String),
    #[error("truncated dump: stream ended inside <page>")]
    Truncated,
}

impl TomeError for XmlError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::DataLoss
    }
}

#[derive(Default)]
struct PageBuilder {
    title: String,
    id: Option<u64>,
    namespace: i32,
    wikitext: String,
    timestamp: String,
    redirect: Option<String>,
}

impl PageBuilder {
    fn build(self) -> Option<RawPage> {
        Some(RawPage {
            title: self.title,
            id: self.id?,
            namespace: self.namespace,
            wikitext: self.wikitext,
            timestamp: self.timestamp,
            redirect: self.redirect,
        })
    }
}

/// Streaming page scanner over any buffered reader of dump XML.
pub struct PageSplitter<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    /// Element names from `<page>` downward; empty means between pages.
    path: Vec<String>,
    page: Option<PageBuilder>,
}

impl<R: AsyncBufRead + Unpin> PageSplitter<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        // A ranged resume can start mid-document, so end tags with no
        // matching start (the cut-off page's tail, the closing root)
        // must flow through; page-level balance is checked here instead.
        reader.config_mut().check_end_names = false;
        PageSplitter {
            reader,
            buf: Vec::new(),
            path: Vec::new(),
            page: None,
        }
    }

    pub fn from_unbuffered<S: tokio::io::AsyncRead + Unpin>(source: S) -> PageSplitter<BufReader<S>> {
        PageSplitter::new(BufReader::new(source))
    }

    fn malformed(e: impl std::fmt::Display) -> XmlError {
        XmlError::Malformed(e.to_string())
    }

    /// The next `<page>` in document order, or `None` at end of dump.
    pub async fn next_page(&mut self) -> Result<Option<RawPage>, XmlError> {
        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into_async(&mut self.buf)
                .await
                .map_err(Self::malformed)?;
            match event {
                Event::Start(start) => {
                    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    if self.page.is_none() {
                        if name == "page" {
                            self.page = Some(PageBuilder::default());
                            self.path.push(name);
                        }
                        continue;
                    }
                    self.path.push(name);
                }
                Event::Empty(empty) => {
                    if let Some(page) = &mut self.page {
                        if empty.local_name().as_ref() == b"redirect" {
                            let target = empty
                                .try_get_attribute("title")
                                .map_err(Self::malformed)?
                                .map(|attr| {
                                    attr.unescape_value()
                                        .map(|v| v.into_owned())
                                        .map_err(Self::malformed)
                                })
                                .transpose()?;
                            page.redirect = target;
                        }
                    }
                }
                Event::Text(text) => {
                    if self.page.is_some() {
                        let content = text.unescape().map_err(Self::malformed)?;
                        self.absorb_text(&content);
                    }
                }
                Event::CData(cdata) => {
                    if self.page.is_some() {
                        let content = String::from_utf8_lossy(&cdata).into_owned();
                        self.absorb_text(&content);
                    }
                }
                Event::End(end) => {
                    if self.page.is_none() {
                        continue;
                    }
                    let name = String::from_utf8_lossy(end.local_name().as_ref()).into_owned();
                    match self.path.pop() {
                        Some(open) if open == name => {}
                        _ => return Err(XmlError::Malformed(format!("unbalanced </{name}>"))),
                    }
                    if name == "page" {
                        let builder = self.page.take().expect("inside a page");
                        self.path.clear();
                        if let Some(page) = builder.build() {
                            return Ok(Some(page));
                        }
                        // A page without an id is dropped, not fatal.
                        continue;
                    }
                }
                Event::Eof => {
                    if self.page.is_some() {
                        return Err(XmlError::Truncated);
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    fn absorb_text(&mut self, content: &str) {
        let Some(page) = &mut self.page else {
            return;
        };
        let path: Vec<&str> = self.path.iter().map(String::as_str).collect();
        match path.as_slice() {
            ["page", "title"] => page.title.push_str(content),
            ["page", "ns"] => {
                if let Ok(ns) = content.trim().parse() {
                    page.namespace = ns;
                }
            }
            ["page", "id"] => {
                if page.id.is_none() {
                    page.id = content.trim().parse().ok();
                }
            }
            ["page", "revision", "timestamp"] => page.timestamp.push_str(content),
            ["page", "revision", "text"] => page.wikitext.push_str(content),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"<mediawiki xmlns="http://www.mediawiki.org/xml/export-0.11/">
  <siteinfo><sitename>Wikipedia</sitename></siteinfo>
  <page>
    <title>Albert Einstein</title>
    <ns>0</ns>
    <id>736</id>
    <revision>
      <id>123456</id>
      <timestamp>2024-05-01T12:00:00Z</timestamp>
      <text bytes="64">{{Infobox scientist|name=Albert Einstein}} A physicist.</text>
    </revision>
  </page>
  <page>
    <title>Talk:Something</title>
    <ns>1</ns>
    <id>737</id>
    <revision>
      <timestamp>2024-05-02T12:00:00Z</timestamp>
      <text>chatter</text>
    </revision>
  </page>
  <page>
    <title>Old Name</title>
    <ns>0</ns>
    <id>738</id>
    <redirect title="Albert Einstein" />
    <revision>
      <timestamp>2024-05-03T12:00:00Z</timestamp>
      <text>#REDIRECT [[Albert Einstein]]</text>
    </revision>
  </page>
</mediawiki>"#;

    async fn collect(xml: &str) -> Result<Vec<RawPage>, XmlError> {
        let mut splitter = PageSplitter::new(BufReader::new(xml.as_bytes()));
        let mut pages = Vec::new();
        while let Some(page) = splitter.next_page().await? {
            pages.push(page);
        }
        Ok(pages)
    }

    #[tokio::test]
    async fn splits_pages_with_fields() {
        let pages = collect(DUMP).await.unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].title, "Albert Einstein");
        assert_eq!(pages[0].id, 736);
        assert_eq!(pages[0].namespace, 0);
        assert!(pages[0].wikitext.contains("Infobox scientist"));
        assert_eq!(pages[0].timestamp, "2024-05-01T12:00:00Z");
        assert_eq!(pages[0].redirect, None);
    }

    #[tokio::test]
    async fn revision_id_does_not_clobber_page_id() {
        let pages = collect(DUMP).await.unwrap();
        assert_eq!(pages[0].id, 736);
    }

    #[tokio::test]
    async fn non_article_namespaces_pass_through() {
        let pages = collect(DUMP).await.unwrap();
        assert_eq!(pages[1].namespace, 1);
        assert!(!pages[1].is_article());
    }

    #[tokio::test]
    async fn redirect_attribute_is_captured() {
        let pages = collect(DUMP).await.unwrap();
        assert_eq!(pages[2].redirect.as_deref(), Some("Albert Einstein"));
    }

    #[tokio::test]
    async fn truncated_page_is_fatal() {
        let xml = "<mediawiki><page><title>X</title><id>1</id>";
        assert!(matches!(collect(xml).await, Err(XmlError::Truncated)));
    }

    #[tokio::test]
    async fn mid_stream_fragment_recovers_at_next_page() {
        // What a ranged resume sees when it lands inside a page: the cut
        // page's tail is dropped, the next full page parses.
        let xml = "physicist.</text></revision></page>\n\
            <page><title>Next</title><ns>0</ns><id>12</id>\
            <revision><timestamp>t</timestamp><text>body</text></revision></page>\n\
            </mediawiki>";
        let pages = collect(xml).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].id, 12);
        assert_eq!(pages[0].wikitext, "body");
    }

    #[tokio::test]
    async fn unknown_children_are_ignored() {
        let xml = r#"<mediawiki><page><title>X</title><ns>0</ns><id>9</id>
            <sha1>abc</sha1><restrictions>edit</restrictions>
            <revision><timestamp>t</timestamp><text>body</text><format>wiki</format></revision>
        </page></mediawiki>"#;
        let pages = collect(xml).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].wikitext, "body");
    }
}
