// 📄 Reference-Data Document - streaming scan of one FULINS XML file
//
// A document is a long list of `<RefData>` blocks. Entries are pulled one at
// a time through quick-xml; the whole document is never held in memory.
//
//   <RefData>
//     <FinInstrmGnlAttrbts><Id>ISIN</Id><FullNm/>..<NtnlCcy/></FinInstrmGnlAttrbts>
//     <Issr>LEI</Issr>
//     <TradgVnRltdAttrbts><Id>MIC</Id>..</TradgVnRltdAttrbts>
//     <TechAttrbts><RlvntCmptntAuthrty>CC</RlvntCmptntAuthrty>..</TechAttrbts>
//   </RefData>

use crate::error::DocumentError;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::io::BufRead;

const ENTRY_TAG: &[u8] = b"RefData";

// ============================================================================
// ENTRY
// ============================================================================

/// One instrument's reference data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDataEntry {
    pub isin: String,
    pub full_name: Option<String>,
    pub currency: Option<String>,
    pub issuer_lei: Option<String>,
    pub trading_venue: Option<String>,
    pub competent_authority: Option<String>,
}

impl ReferenceDataEntry {
    pub fn new(isin: &str, issuer_lei: Option<&str>) -> Self {
        ReferenceDataEntry {
            isin: isin.to_string(),
            full_name: None,
            currency: None,
            issuer_lei: issuer_lei.map(str::to_string),
            trading_venue: None,
            competent_authority: None,
        }
    }
}

#[derive(Debug, Default)]
struct PartialEntry {
    isin: Option<String>,
    full_name: Option<String>,
    currency: Option<String>,
    issuer_lei: Option<String>,
    trading_venue: Option<String>,
    competent_authority: Option<String>,
}

impl PartialEntry {
    /// `path` is relative to the enclosing RefData element
    fn assign(&mut self, path: &[String], text: &str) {
        if text.is_empty() {
            return;
        }
        let slot = match path {
            [a, b] if a == "FinInstrmGnlAttrbts" && b == "Id" => &mut self.isin,
            [a, b] if a == "FinInstrmGnlAttrbts" && b == "FullNm" => &mut self.full_name,
            [a, b] if a == "FinInstrmGnlAttrbts" && b == "NtnlCcy" => &mut self.currency,
            [a] if a == "Issr" => &mut self.issuer_lei,
            [a, b] if a == "TradgVnRltdAttrbts" && b == "Id" => &mut self.trading_venue,
            [a, b] if a == "TechAttrbts" && b == "RlvntCmptntAuthrty" => {
                &mut self.competent_authority
            }
            _ => return,
        };
        // First occurrence wins (an instrument may list several venues)
        if slot.is_none() {
            *slot = Some(text.to_string());
        }
    }

    fn finish(self) -> Option<ReferenceDataEntry> {
        Some(ReferenceDataEntry {
            isin: self.isin?,
            full_name: self.full_name,
            currency: self.currency,
            issuer_lei: self.issuer_lei,
            trading_venue: self.trading_venue,
            competent_authority: self.competent_authority,
        })
    }
}

// ============================================================================
// STREAMING READER
// ============================================================================

/// Iterator over the entries of one document.
///
/// Yields an error at most once (then stops): a broken document is reported,
/// whatever was read before the break has already been yielded.
pub struct EntryReader<R: BufRead> {
    name: String,
    reader: Reader<R>,
    buf: Vec<u8>,
    path: Vec<String>,
    current: Option<PartialEntry>,
    done: bool,
}

impl<R: BufRead> EntryReader<R> {
    pub fn new(name: &str, source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);
        EntryReader {
            name: name.to_string(),
            reader,
            buf: Vec::with_capacity(4096),
            path: Vec::new(),
            current: None,
            done: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn xml_error(&self, message: impl std::fmt::Display) -> DocumentError {
        DocumentError::Xml {
            name: self.name.clone(),
            message: format!("at byte {}: {}", self.reader.buffer_position(), message),
        }
    }
}

impl<R: BufRead> Iterator for EntryReader<R> {
    type Item = Result<ReferenceDataEntry, DocumentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event.into_owned(),
                Err(e) => {
                    self.done = true;
                    return Some(Err(self.xml_error(e)));
                }
            };

            match event {
                Event::Start(start) => {
                    let local = start.local_name();
                    if local.as_ref() == ENTRY_TAG {
                        self.current = Some(PartialEntry::default());
                        self.path.clear();
                    } else if self.current.is_some() {
                        self.path
                            .push(String::from_utf8_lossy(local.as_ref()).into_owned());
                    }
                }
                Event::Text(text) => {
                    if let Some(entry) = self.current.as_mut() {
                        match text.unescape() {
                            Ok(value) => entry.assign(&self.path, value.trim()),
                            Err(e) => {
                                self.done = true;
                                return Some(Err(self.xml_error(e)));
                            }
                        }
                    }
                }
                Event::End(end) => {
                    if end.local_name().as_ref() == ENTRY_TAG {
                        self.path.clear();
                        if let Some(entry) = self.current.take().and_then(PartialEntry::finish) {
                            return Some(Ok(entry));
                        }
                    } else if self.current.is_some() {
                        self.path.pop();
                    }
                }
                Event::Eof => {
                    self.done = true;
                    if self.current.is_some() {
                        return Some(Err(self.xml_error("document ended inside an entry")));
                    }
                    return None;
                }
                _ => {}
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
