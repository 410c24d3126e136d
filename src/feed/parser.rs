use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Prefix, ResolveResult};
use quick_xml::NsReader;
use thiserror::Error;

/// Nesting deeper than this is treated as a malformation.
const MAX_DEPTH: usize = 128;

/// Namespaces the parser reads, keyed by URI, with the prefix element names
/// get regardless of the prefix the document bound. An empty prefix means
/// the names are matched bare, like undeclared RSS 2.0 elements.
const NAMESPACES: &[(&str, &str)] = &[
    ("http://www.w3.org/2005/Atom", "atom"),
    ("http://purl.org/atom/ns#", "atom"),
    ("http://www.itunes.com/dtds/podcast-1.0.dtd", "itunes"),
    ("http://purl.org/rss/1.0/modules/content/", "content"),
    ("http://purl.org/dc/elements/1.1/", "dc"),
    ("http://purl.org/dc/terms/", "dcterms"),
    ("http://www.w3.org/1999/02/22-rdf-syntax-ns#", "rdf"),
    ("http://www.w3.org/XML/1998/namespace", "xml"),
    ("http://purl.org/rss/1.0/", ""),
    ("http://my.netscape.com/rdf/simple/0.9/", ""),
    ("http://backend.userland.com/rss2", ""),
];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

// ============================================================================
// Public Types
// ============================================================================

/// Feed-level metadata. Every field is optional; absence means "not stated".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub language: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// One normalized entry, independent of the dialect it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryRecord {
    /// External id: entry id, else RSS guid, else link. `None` means the
    /// entry cannot be deduplicated and will not be stored.
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    /// Raw summary markup; normalized to text later in the pipeline.
    pub summary: Option<String>,
    /// Full article text, only ever set by enrichment.
    pub content: Option<String>,
    pub audio_url: Option<String>,
    /// `itunes:duration`, passed through as written.
    pub duration: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// A media reference attached to an entry, either an enclosure or a link.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRef {
    pub href: String,
    pub media_type: Option<String>,
    pub rel: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub feed: FeedMetadata,
    pub entries: Vec<EntryRecord>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Malformed document with nothing recoverable
    #[error("Malformed feed: {0}")]
    Malformed(String),
}

/// Tagged result of a tolerant parse.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Success(ParsedFeed),
    /// The document was malformed but at least one entry was recovered.
    PartialSuccess(ParsedFeed, Vec<String>),
    Failure(ParseError),
}

impl ParseOutcome {
    /// Partial parses are treated as successes by every caller.
    pub fn into_result(self) -> Result<ParsedFeed, ParseError> {
        match self {
            Self::Success(parsed) | Self::PartialSuccess(parsed, _) => Ok(parsed),
            Self::Failure(err) => Err(err),
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Self::PartialSuccess(_, warnings) => warnings,
            _ => &[],
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse RSS 2.0, RSS 1.0 (RDF) or Atom bytes into a [`ParsedFeed`].
///
/// Reading stops at the first malformation (syntax error, mismatched tag,
/// truncation). Entries completed before that point are kept; an entry cut
/// off mid-way is kept only if its identifying fields were already complete.
///
/// A well-formed document with some other root element is not an error: it
/// simply has no feed metadata and no entries.
pub fn parse_feed(bytes: &[u8]) -> ParseOutcome {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let (document, malformation) = read_tree(bytes);

    let Some(root) = document.children.iter().find_map(Node::as_element) else {
        let reason = malformation.unwrap_or_else(|| "document has no root element".to_string());
        return ParseOutcome::Failure(ParseError::Malformed(reason));
    };

    let parsed = match root.name.as_str() {
        "rss" => parse_rss(root),
        "rdf:RDF" | "RDF" => parse_rdf(root),
        "atom:feed" => parse_atom(root, "atom:"),
        // Atom written without its namespace declaration
        "feed" => parse_atom(root, ""),
        other => {
            tracing::debug!(root = %other, "Document root is not a feed element");
            ParsedFeed::default()
        }
    };

    match malformation {
        None => ParseOutcome::Success(parsed),
        Some(reason) if parsed.entries.is_empty() => {
            ParseOutcome::Failure(ParseError::Malformed(reason))
        }
        Some(reason) => {
            tracing::debug!(
                entries = parsed.entries.len(),
                reason = %reason,
                "Recovered entries from malformed feed"
            );
            ParseOutcome::PartialSuccess(parsed, vec![reason])
        }
    }
}

fn parse_rss(root: &Element) -> ParsedFeed {
    let channel = root.open_child("channel");
    let items = channel
        .into_iter()
        .chain(std::iter::once(root))
        .flat_map(|parent| parent.open_children("item"));
    let entries = items.filter_map(rss_entry).collect();

    finish(channel.map(rss_metadata).unwrap_or_default(), entries)
}

fn parse_rdf(root: &Element) -> ParsedFeed {
    let entries = root.open_children("item").filter_map(rss_entry).collect();
    let feed = root.open_child("channel").map(rss_metadata).unwrap_or_default();
    finish(feed, entries)
}

/// `atom` is the prefix Atom element names carry: `atom:` when the Atom
/// namespace is declared, empty when it is not.
fn parse_atom(root: &Element, atom: &str) -> ParsedFeed {
    let name = |local: &str| format!("{atom}{local}");
    let feed = FeedMetadata {
        title: root.child_text(&name("title")),
        description: root
            .child_markup(&name("subtitle"))
            .or_else(|| root.child_markup(&name("tagline"))),
        link: atom_alternate(root, &name("link")),
        language: root.attr("xml:lang").and_then(non_empty),
        published: first_date(root, &[name("published"), name("updated"), name("modified")]),
    };
    let entries = root
        .open_children(&name("entry"))
        .filter_map(|entry| atom_entry(entry, atom))
        .collect();
    finish(feed, entries)
}

/// The feed's own date falls back to its newest entry.
fn finish(mut feed: FeedMetadata, entries: Vec<EntryRecord>) -> ParsedFeed {
    if feed.published.is_none() {
        feed.published = entries.iter().filter_map(|e| e.published).max();
    }
    ParsedFeed { feed, entries }
}

fn rss_metadata(channel: &Element) -> FeedMetadata {
    FeedMetadata {
        title: channel.child_text("title").or_else(|| channel.child_text("dc:title")),
        description: channel
            .child_markup("description")
            .or_else(|| channel.child_markup("itunes:summary"))
            .or_else(|| channel.child_text("itunes:subtitle")),
        link: channel
            .child_text("link")
            .or_else(|| atom_alternate(channel, "atom:link")),
        language: channel
            .child_text("language")
            .or_else(|| channel.child_text("dc:language"))
            .or_else(|| channel.attr("xml:lang").and_then(non_empty)),
        published: first_date(
            channel,
            &["pubDate", "dc:date", "lastBuildDate", "atom:updated"],
        ),
    }
}

fn rss_entry(item: &Element) -> Option<EntryRecord> {
    let link = item.child_text("link");

    let mut enclosures = Vec::new();
    let mut links = Vec::new();
    for child in item.closed_elements() {
        match child.name.as_str() {
            "enclosure" => enclosures.extend(media_ref(child, "url", Some("enclosure"))),
            "atom:link" => {
                let media = media_ref(child, "href", Some("alternate"));
                if child.attr("rel") == Some("enclosure") {
                    enclosures.extend(media);
                } else {
                    links.extend(media);
                }
            }
            _ => {}
        }
    }
    if let Some(href) = &link {
        links.insert(
            0,
            MediaRef {
                href: href.clone(),
                media_type: None,
                rel: Some("alternate".to_string()),
            },
        );
    }

    let entry = EntryRecord {
        guid: first_some([item.child_text("atom:id"), item.child_text("guid"), link.clone()]),
        title: item.child_text("title").or_else(|| item.child_text("dc:title")),
        link,
        summary: item
            .child_markup("description")
            .or_else(|| item.child_markup("content:encoded"))
            .or_else(|| item.child_markup("itunes:summary")),
        content: None,
        audio_url: select_audio_url(&enclosures, &links),
        duration: item.child_text("itunes:duration"),
        published: first_date(item, &["pubDate", "dc:date", "dcterms:issued"])
            .or_else(|| first_date(item, &["dcterms:modified", "atom:updated"])),
    };
    keep_entry(item, entry)
}

fn atom_entry(entry: &Element, atom: &str) -> Option<EntryRecord> {
    let name = |local: &str| format!("{atom}{local}");
    let link_name = name("link");

    let mut enclosures = Vec::new();
    let mut links = Vec::new();
    for link in entry.closed_elements().filter(|c| c.name == link_name) {
        let media = media_ref(link, "href", Some("alternate"));
        if link.attr("rel") == Some("enclosure") {
            enclosures.extend(media);
        } else {
            links.extend(media);
        }
    }
    let link = atom_alternate(entry, &link_name);

    let record = EntryRecord {
        guid: first_some([
            entry.child_text(&name("id")),
            entry.child_text("guid"),
            link.clone(),
        ]),
        title: entry.child_text(&name("title")),
        link,
        summary: entry
            .child_markup(&name("summary"))
            .or_else(|| entry.child_markup(&name("content"))),
        content: None,
        audio_url: select_audio_url(&enclosures, &links),
        duration: entry.child_text("itunes:duration"),
        published: first_date(entry, &[name("published"), name("issued")])
            .or_else(|| first_date(entry, &[name("updated"), name("modified")])),
    };
    keep_entry(entry, record)
}

/// Entries cut off by a malformation survive only with a usable id.
fn keep_entry(element: &Element, entry: EntryRecord) -> Option<EntryRecord> {
    if element.closed || entry.guid.is_some() {
        Some(entry)
    } else {
        tracing::debug!(title = ?entry.title, "Dropping truncated entry without id");
        None
    }
}

/// Pick the audio URL for an entry.
///
/// The first enclosure whose type mentions audio, or whose rel is
/// `enclosure`, wins. Otherwise the first link whose type starts with
/// `audio`. Otherwise none.
pub fn select_audio_url(enclosures: &[MediaRef], links: &[MediaRef]) -> Option<String> {
    enclosures
        .iter()
        .find(|m| {
            m.media_type.as_deref().is_some_and(|t| t.contains("audio"))
                || m.rel.as_deref() == Some("enclosure")
        })
        .or_else(|| {
            links
                .iter()
                .find(|m| m.media_type.as_deref().is_some_and(|t| t.starts_with("audio")))
        })
        .map(|m| m.href.clone())
}

fn media_ref(element: &Element, href_attr: &str, default_rel: Option<&str>) -> Option<MediaRef> {
    let href = element.attr(href_attr).and_then(non_empty)?;
    Some(MediaRef {
        href,
        media_type: element.attr("type").and_then(non_empty),
        rel: element
            .attr("rel")
            .and_then(non_empty)
            .or_else(|| default_rel.map(str::to_string)),
    })
}

/// href of the first `rel="alternate"` (or rel-less) link, else of any link.
fn atom_alternate(element: &Element, name: &str) -> Option<String> {
    let links: Vec<&Element> = element.open_children(name).filter(|e| e.closed).collect();
    links
        .iter()
        .find(|l| matches!(l.attr("rel"), None | Some("alternate")))
        .or_else(|| links.iter().find(|l| l.attr("rel") != Some("self")))
        .and_then(|l| l.attr("href"))
        .and_then(non_empty)
}

fn first_date<S: AsRef<str>>(element: &Element, names: &[S]) -> Option<DateTime<Utc>> {
    names
        .iter()
        .filter_map(|name| element.child_text(name.as_ref()))
        .find_map(|raw| {
            let parsed = parse_date(&raw);
            if parsed.is_none() {
                tracing::debug!(value = %raw, "Unparseable feed date");
            }
            parsed
        })
}

fn first_some<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates.into_iter().flatten().next()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ============================================================================
// Dates
// ============================================================================

/// Parse a feed timestamp to UTC.
///
/// Tries RFC 2822, then RFC 3339, then a few common sloppy forms (ISO 8601
/// without offset, space separator, bare date). Offset-less forms are taken
/// as UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Tolerant Tree Reader
// ============================================================================

#[derive(Debug, Default)]
struct Element {
    /// Namespace-qualified name, e.g. `itunes:duration` for any prefix
    /// bound to the iTunes namespace. See [`qualified_name`].
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
    /// Whether the end tag was seen before reading stopped
    closed: bool,
}

#[derive(Debug)]
enum Node {
    Element(Element),
    Text(String),
}

impl Node {
    fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }
}

impl Element {
    fn open(start: &BytesStart<'_>, reader: &NsReader<&[u8]>) -> Self {
        let decoder = reader.decoder();
        let (namespace, local) = reader.resolve_element(start.name());
        let name = qualified_name(decoder, namespace, start.name().prefix(), local.as_ref());

        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = match attr {
                Ok(attr) => attr,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed feed attribute");
                    continue;
                }
            };
            // Bindings are already applied to the names
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let (namespace, local) = reader.resolve_attribute(attr.key);
            let key = qualified_name(decoder, namespace, attr.key.prefix(), local.as_ref());
            let value = match attr.decode_and_unescape_value(decoder) {
                Ok(v) => v.into_owned(),
                Err(_) => decode_lossy(decoder, &attr.value),
            };
            attrs.push((key, value));
        }

        Self {
            name,
            attrs,
            children: Vec::new(),
            closed: false,
        }
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Direct child elements, whether or not they were completed.
    fn open_children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children
            .iter()
            .filter_map(Node::as_element)
            .filter(move |e| e.name == name)
    }

    fn open_child<'a>(&'a self, name: &'a str) -> Option<&'a Element> {
        self.open_children(name).next()
    }

    /// Direct child elements that were completed. Field values only ever come
    /// from these, so a truncated field never leaks half its text.
    fn closed_elements(&self) -> impl Iterator<Item = &Element> {
        self.children
            .iter()
            .filter_map(Node::as_element)
            .filter(|e| e.closed)
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.closed_elements().find(|e| e.name == name)
    }

    fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).and_then(Element::text)
    }

    fn child_markup(&self, name: &str) -> Option<String> {
        self.child(name).and_then(Element::markup)
    }

    /// All descendant text, trimmed.
    fn text(&self) -> Option<String> {
        let mut out = String::new();
        self.collect_text(&mut out);
        non_empty(&out)
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Inner content as markup. Text-only content (escaped HTML or CDATA) is
    /// returned as-is; nested elements (inline XHTML) are re-serialized.
    fn markup(&self) -> Option<String> {
        if !self.children.iter().any(|c| matches!(c, Node::Element(_))) {
            return self.text();
        }

        let mut nodes = &self.children;
        if self.attr("type") == Some("xhtml") {
            let mut elements = self.children.iter().filter_map(Node::as_element);
            if let (Some(div), None) = (elements.next(), elements.next()) {
                if local_name(&div.name) == "div" {
                    nodes = &div.children;
                }
            }
        }

        let mut out = String::new();
        for node in nodes {
            write_markup(node, &mut out);
        }
        non_empty(&out)
    }
}

fn write_markup(node: &Node, out: &mut String) {
    match node {
        Node::Text(t) => out.push_str(&escape(t)),
        Node::Element(e) => {
            let name = local_name(&e.name);
            out.push('<');
            out.push_str(name);
            for (key, value) in &e.attrs {
                out.push(' ');
                out.push_str(local_name(key));
                out.push_str("=\"");
                out.push_str(&escape(value));
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&name) {
                return;
            }
            for child in &e.children {
                write_markup(child, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Name an element or attribute by its namespace rather than its prefix.
///
/// Names in a namespace from [`NAMESPACES`] get that entry's prefix, so
/// `<a:entry xmlns:a="http://www.w3.org/2005/Atom">` becomes `atom:entry`.
/// Unbound names stay bare. Names in any other namespace, or with an
/// undeclared prefix, keep the prefix as written.
fn qualified_name(
    decoder: Decoder,
    namespace: ResolveResult<'_>,
    written_prefix: Option<Prefix<'_>>,
    local: &[u8],
) -> String {
    let local = decode_lossy(decoder, local);
    let known = match namespace {
        ResolveResult::Bound(uri) => known_prefix(&decode_lossy(decoder, uri.as_ref())),
        ResolveResult::Unbound | ResolveResult::Unknown(_) => None,
    };
    let prefix = match known {
        Some(prefix) => prefix.to_string(),
        None => written_prefix
            .map(|p| decode_lossy(decoder, p.as_ref()))
            .unwrap_or_default(),
    };

    if prefix.is_empty() {
        local
    } else {
        format!("{prefix}:{local}")
    }
}

fn known_prefix(uri: &str) -> Option<&'static str> {
    let uri = uri.trim();
    NAMESPACES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(uri))
        .map(|(_, prefix)| *prefix)
}

/// Decode with the document's declared encoding, replacing what won't decode.
fn decode_lossy(decoder: Decoder, bytes: &[u8]) -> String {
    match decoder.decode(bytes) {
        Ok(text) => text.into_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Read `bytes` into a document tree, stopping at the first malformation.
///
/// Returns a synthetic document node whose children are the top-level nodes,
/// plus the reason reading stopped early, if it did. Elements still open at
/// that point are attached to their parents with `closed == false`.
fn read_tree(bytes: &[u8]) -> (Element, Option<String>) {
    let mut reader = NsReader::from_reader(bytes);
    let mut stack = vec![Element::default()];
    let mut malformation = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if stack.len() > MAX_DEPTH {
                    malformation = Some(format!("nesting deeper than {} elements", MAX_DEPTH));
                    break;
                }
                stack.push(Element::open(&start, &reader));
            }
            Ok(Event::Empty(start)) => {
                let mut element = Element::open(&start, &reader);
                element.closed = true;
                attach(&mut stack, Node::Element(element));
            }
            Ok(Event::End(_)) => {
                // The reader verifies end names, so this always matches the top
                if stack.len() > 1 {
                    if let Some(mut element) = stack.pop() {
                        element.closed = true;
                        attach(&mut stack, Node::Element(element));
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let value = match text.unescape() {
                    Ok(v) => v.into_owned(),
                    // Undeclared entities such as &nbsp; are kept verbatim
                    Err(_) => decode_lossy(reader.decoder(), &text),
                };
                attach(&mut stack, Node::Text(value));
            }
            Ok(Event::CData(data)) => {
                let value = match data.decode() {
                    Ok(v) => v.into_owned(),
                    Err(_) => decode_lossy(reader.decoder(), &data),
                };
                attach(&mut stack, Node::Text(value));
            }
            Ok(Event::Eof) => {
                if stack.len() > 1 {
                    malformation = Some("document truncated inside an element".to_string());
                }
                break;
            }
            Err(e) => {
                malformation = Some(format!(
                    "XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                ));
                break;
            }
            Ok(_) => {}
        }
    }

    while stack.len() > 1 {
        if let Some(element) = stack.pop() {
            attach(&mut stack, Node::Element(element));
        }
    }
    let document = stack.pop().unwrap_or_default();
    (document, malformation)
}

fn attach(stack: &mut [Element], node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}
