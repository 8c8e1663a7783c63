//! Multi-strategy product extraction.
//!
//! Works against arbitrary, unknown page structures: a cascade of
//! configured container selectors is tried first, and only when it yields
//! nothing does the engine fall back to progressively looser scans of the
//! whole document (link text, raw text nodes, attribute values), ending
//! with a synthetic presence notice when a term is on the page but no
//! concrete element can be isolated.

use std::collections::HashSet;

use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{SelectorSet, Target};
use crate::fetcher::FetchedPage;
use crate::models::Product;

/// Tags that are purely typographic wrappers; candidate discovery walks
/// up past these to a more meaningful container.
const INLINE_WRAPPERS: &[&str] = &["span", "strong", "em", "b", "i"];
const INLINE_WRAPPERS_TEXT: &[&str] = &["span", "strong", "em", "b", "i", "small"];

const TITLE_MAX_CHARS: usize = 100;
const DESCRIPTION_MAX_CHARS: usize = 200;

/// Capability view over a parsed element: visible text, the attribute
/// bag, and containment queries, keeping parser types at the module edge.
#[derive(Clone, Copy)]
struct PageElement<'a> {
    inner: ElementRef<'a>,
}

impl<'a> From<ElementRef<'a>> for PageElement<'a> {
    fn from(inner: ElementRef<'a>) -> Self {
        Self { inner }
    }
}

impl<'a> PageElement<'a> {
    fn text(&self) -> String {
        self.inner.text().collect::<String>()
    }

    fn tag(&self) -> &'a str {
        self.inner.value().name()
    }

    fn attr(&self, name: &str) -> Option<&'a str> {
        self.inner.value().attr(name)
    }

    fn attributes(&self) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.inner.value().attrs()
    }

    fn select_first(&self, selector: &Selector) -> Option<PageElement<'a>> {
        self.inner.select(selector).next().map(Self::from)
    }

    /// First non-inline ancestor, or the element itself when the walk
    /// runs off the top of the tree.
    fn nearest_container(self, inline: &[&str]) -> PageElement<'a> {
        let mut node = self.inner.parent();
        while let Some(parent) = node {
            match ElementRef::wrap(parent) {
                Some(el) if inline.contains(&el.value().name()) => node = parent.parent(),
                Some(el) => return Self::from(el),
                None => node = parent.parent(),
            }
        }
        self
    }
}

/// A node proposed by one of the strategies as possibly being one item.
enum Candidate<'a> {
    Node(PageElement<'a>),
    /// Nothing concrete could be isolated, but at least one search term
    /// appears somewhere on the page.
    Presence { note: String },
}

/// Per-target selector lists compiled once per scan. Unparseable selector
/// strings are dropped with a warning instead of blinding the target.
struct CompiledSelectors {
    containers: Vec<Selector>,
    title: Vec<Selector>,
    price: Vec<Selector>,
    link: Vec<Selector>,
    description: Vec<Selector>,
    image: Selector,
}

impl CompiledSelectors {
    fn compile(set: &SelectorSet) -> Self {
        Self {
            containers: compile_list(&set.containers, "container"),
            title: compile_list(&set.title, "title"),
            price: compile_list(&set.price, "price"),
            link: compile_list(&set.link, "link"),
            description: compile_list(&set.description, "description"),
            image: Selector::parse("img").unwrap(),
        }
    }
}

fn compile_list(raw: &[String], kind: &str) -> Vec<Selector> {
    raw.iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(selector) => Some(selector),
            Err(e) => {
                warn!("Skipping invalid {kind} selector '{s}': {e:?}");
                None
            }
        })
        .collect()
}

pub struct ExtractionEngine {
    exclude_terms: Vec<String>,
}

impl ExtractionEngine {
    /// Exclusion terms are injected here once; they apply to every target.
    pub fn new(exclude_terms: &[String]) -> Self {
        Self {
            exclude_terms: exclude_terms.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    /// Extract all products on the page matching the target's search
    /// terms. Candidates without a usable title, with no term in the
    /// title, or with an excluded term in the title are dropped.
    pub fn search(&self, page: &FetchedPage, target: &Target) -> Vec<Product> {
        let document = Html::parse_document(&page.body);
        let selectors = CompiledSelectors::compile(&target.selectors);
        let search_terms: Vec<String> =
            target.search_terms.iter().map(|t| t.to_lowercase()).collect();

        let candidates = collect_candidates(&document, &selectors, &search_terms);
        if candidates.is_empty() {
            debug!("No candidates on {}", target.name);
            return Vec::new();
        }

        let mut products = Vec::new();
        for candidate in &candidates {
            let Some(product) =
                extract_product(candidate, &selectors, &search_terms, &page.base_url)
            else {
                continue;
            };

            // Filtering is title-scoped on purpose: container text is full
            // of boilerplate that mentions terms without being the item.
            let title = product.title.to_lowercase();
            if !search_terms.iter().any(|term| title.contains(term.as_str())) {
                debug!("Dropping '{}': no search term in title", product.title);
                continue;
            }
            if let Some(term) = self.exclude_terms.iter().find(|t| title.contains(t.as_str())) {
                debug!("Dropping '{}': excluded term '{term}'", product.title);
                continue;
            }
            products.push(product);
        }

        info!(
            "{}: {} candidate(s), {} matching product(s)",
            target.name,
            candidates.len(),
            products.len()
        );
        products
    }
}

/// Strategy precedence: container cascade, then (gated on a whole-text
/// term hit) link-anchored, text-node, and attribute scans, then the
/// presence notice. Each stage runs only when the previous one produced
/// nothing.
fn collect_candidates<'a>(
    document: &'a Html,
    selectors: &CompiledSelectors,
    search_terms: &[String],
) -> Vec<Candidate<'a>> {
    let mut elements: Vec<PageElement<'a>> = Vec::new();
    for selector in &selectors.containers {
        let matched: Vec<_> = document.select(selector).map(PageElement::from).collect();
        if !matched.is_empty() {
            debug!("Container selector matched {} element(s)", matched.len());
            elements.extend(matched);
        }
    }
    if !elements.is_empty() {
        return elements.into_iter().map(Candidate::Node).collect();
    }

    debug!("No container matches; scanning whole document text");
    let page_text = PageElement::from(document.root_element()).text().to_lowercase();
    let found_terms: Vec<String> = search_terms
        .iter()
        .filter(|t| page_text.contains(t.as_str()))
        .cloned()
        .collect();
    if found_terms.is_empty() {
        return Vec::new();
    }
    debug!("Term(s) present in page text: {}", found_terms.join(", "));

    let mut elements = links_mentioning_terms(document, search_terms);
    if elements.is_empty() {
        elements = text_nodes_mentioning_terms(document, search_terms);
    }
    if elements.is_empty() {
        elements = attributes_mentioning_terms(document, &found_terms);
    }
    if elements.is_empty() {
        info!("No concrete element isolated; emitting presence notice");
        return vec![Candidate::Presence {
            note: format!("Found a match mentioning: {}", found_terms.join(", ")),
        }];
    }
    elements.into_iter().map(Candidate::Node).collect()
}

/// Hyperlinks whose visible text mentions a term, lifted to their nearest
/// non-inline ancestor.
fn links_mentioning_terms<'a>(document: &'a Html, terms: &[String]) -> Vec<PageElement<'a>> {
    let anchor = Selector::parse("a[href]").unwrap();
    let mut out = Vec::new();
    for link in document.select(&anchor) {
        let link = PageElement::from(link);
        let text = link.text().to_lowercase();
        if terms.iter().any(|t| text.contains(t.as_str())) {
            out.push(link.nearest_container(INLINE_WRAPPERS));
        }
    }
    if !out.is_empty() {
        debug!("Link-anchored scan produced {} candidate(s)", out.len());
    }
    out
}

/// Raw text nodes mentioning a term, lifted past inline wrappers and
/// deduplicated by node identity.
fn text_nodes_mentioning_terms<'a>(document: &'a Html, terms: &[String]) -> Vec<PageElement<'a>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for node in document.tree.nodes() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let lowered = text.to_lowercase();
        if !terms.iter().any(|t| lowered.contains(t.as_str())) {
            continue;
        }
        let Some(parent) = node.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let parent = PageElement::from(parent);
        let container = if INLINE_WRAPPERS_TEXT.contains(&parent.tag()) {
            parent.nearest_container(INLINE_WRAPPERS_TEXT)
        } else {
            parent
        };
        if seen.insert(container.inner.id()) {
            out.push(container);
        }
    }
    if !out.is_empty() {
        debug!("Text-node scan produced {} candidate(s)", out.len());
    }
    out
}

/// Elements carrying any attribute value that mentions one of the terms
/// already known to be present in the page text.
fn attributes_mentioning_terms<'a>(
    document: &'a Html,
    found_terms: &[String],
) -> Vec<PageElement<'a>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for node in document.tree.nodes() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let element = PageElement::from(el);
        let matched = element.attributes().any(|(_, value)| {
            let value = value.to_lowercase();
            found_terms.iter().any(|t| value.contains(t.as_str()))
        });
        if matched && seen.insert(el.id()) {
            out.push(element);
        }
    }
    if !out.is_empty() {
        debug!("Attribute scan produced {} candidate(s)", out.len());
    }
    out
}

/// Pull the product fields out of one candidate. Returns `None` when no
/// non-empty title can be derived.
fn extract_product(
    candidate: &Candidate<'_>,
    selectors: &CompiledSelectors,
    search_terms: &[String],
    base_url: &Url,
) -> Option<Product> {
    let element = match candidate {
        Candidate::Presence { note } => {
            return Some(Product {
                title: note.clone(),
                price: None,
                link: None,
                description: Some(note.clone()),
                image: None,
                discovered_at: Utc::now(),
            });
        }
        Candidate::Node(element) => element,
    };

    let mut title = first_selector_text(element, &selectors.title);
    if title.is_empty() {
        title = derive_title(&element.text(), search_terms);
    }
    if title.is_empty() {
        return None;
    }

    let price = non_empty(first_selector_text(element, &selectors.price));

    let link = selectors
        .link
        .iter()
        .find_map(|selector| {
            element
                .select_first(selector)
                .and_then(|el| el.attr("href"))
                .and_then(|href| base_url.join(href).ok())
        })
        .map(|url| url.to_string());

    let mut description = non_empty(truncate_chars(
        &first_selector_text(element, &selectors.description),
        DESCRIPTION_MAX_CHARS,
    ));
    if description.is_none() {
        description = non_empty(truncate_chars(element.text().trim(), DESCRIPTION_MAX_CHARS));
    }

    let image = element
        .select_first(&selectors.image)
        .and_then(|img| img.attr("data-src").or_else(|| img.attr("src")))
        .and_then(|src| base_url.join(src).ok())
        .map(|url| url.to_string());

    Some(Product {
        title,
        price,
        link,
        description,
        image,
        discovered_at: Utc::now(),
    })
}

/// First selector in the list that matches anything inside the element;
/// its trimmed text wins even when empty (the caller falls back then).
fn first_selector_text(element: &PageElement<'_>, selectors: &[Selector]) -> String {
    for selector in selectors {
        if let Some(found) = element.select_first(selector) {
            return found.text().trim().to_string();
        }
    }
    String::new()
}

/// Title fallback from the candidate's own text: short text is used as
/// is; long text is reduced to the first sentence naming a search term,
/// or failing that a hard truncation.
fn derive_title(full_text: &str, search_terms: &[String]) -> String {
    let text = full_text.trim();
    if text.chars().count() <= TITLE_MAX_CHARS {
        return text.to_string();
    }
    for sentence in text.split('.') {
        let lowered = sentence.to_lowercase();
        if search_terms.iter().any(|t| lowered.contains(t.as_str())) {
            return truncate_chars(sentence.trim(), TITLE_MAX_CHARS);
        }
    }
    format!("{}...", truncate_chars(text, TITLE_MAX_CHARS))
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}
