use shared::ParsedDocument;
use std::sync::Arc;

/// Options forwarded to the external parser contract.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub format_hint: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum ParseInput<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl<'a> ParseInput<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        match self {
            ParseInput::Text(text) => text.as_bytes(),
            ParseInput::Bytes(bytes) => bytes,
        }
    }
}

/// Seam for the out-of-scope format codecs:
/// `parse(content, filename, options) -> {type, data}`, failing with a
/// format-specific message when the content does not match the claimed
/// format.
pub trait FormatParser: Send + Sync {
    fn name(&self) -> &str;

    /// Filename-based claim, usually by extension.
    fn can_parse(&self, filename: &str) -> bool;

    /// Content-based claim, used when no parser claims the filename.
    fn sniff(&self, _bytes: &[u8]) -> bool {
        false
    }

    fn parse(
        &self,
        content: ParseInput<'_>,
        filename: &str,
        options: &ParseOptions,
    ) -> Result<ParsedDocument, String>;
}

/// Dispatch table for format parsers: filename claims first, content
/// sniffing as the fallback.
#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn FormatParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, parser: Arc<dyn FormatParser>) {
        self.parsers.push(parser);
    }

    pub fn with_parser(mut self, parser: Arc<dyn FormatParser>) -> Self {
        self.register(parser);
        self
    }

    pub fn find(&self, filename: &str, bytes: &[u8]) -> Option<Arc<dyn FormatParser>> {
        self.parsers
            .iter()
            .find(|parser| parser.can_parse(filename))
            .or_else(|| self.parsers.iter().find(|parser| parser.sniff(bytes)))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubParser {
        name: &'static str,
        extension: &'static str,
        magic: &'static [u8],
    }

    impl FormatParser for StubParser {
        fn name(&self) -> &str {
            self.name
        }

        fn can_parse(&self, filename: &str) -> bool {
            shared::get_file_extension(filename).as_deref() == Some(self.extension)
        }

        fn sniff(&self, bytes: &[u8]) -> bool {
            bytes.starts_with(self.magic)
        }

        fn parse(
            &self,
            _content: ParseInput<'_>,
            _filename: &str,
            _options: &ParseOptions,
        ) -> Result<ParsedDocument, String> {
            Ok(ParsedDocument {
                doc_type: self.name.to_string(),
                data: json!({}),
            })
        }
    }

    fn registry() -> ParserRegistry {
        ParserRegistry::new()
            .with_parser(Arc::new(StubParser {
                name: "structure",
                extension: "pdb",
                magic: b"HEADER",
            }))
            .with_parser(Arc::new(StubParser {
                name: "trajectory",
                extension: "xyz",
                magic: b"12\n",
            }))
    }

    #[test]
    fn filename_claim_wins_over_sniffing() {
        let registry = registry();
        let parser = registry.find("protein.pdb", b"12\n").unwrap();
        assert_eq!(parser.name(), "structure");
    }

    #[test]
    fn sniffing_covers_unknown_extensions() {
        let registry = registry();
        let parser = registry.find("dump.bin", b"HEADER  1ABC").unwrap();
        assert_eq!(parser.name(), "structure");
    }

    #[test]
    fn unknown_content_finds_no_parser() {
        let registry = registry();
        assert!(registry.find("dump.bin", b"????").is_none());
    }
}
