// 🗂️ Reference-Data Index - which documents were published in a date range
//
// The index is a Solr core answering XML:
//   <result numFound="N" start="0">
//     <doc>
//       <str name="file_name">FULINS_D_20200301_01of01.zip</str>
//       <str name="download_link">https://...zip</str>
//       <date name="publication_date">2020-03-01T00:00:00Z</date>
//     </doc>
//   </result>

use crate::error::FetchError;
use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

/// Full-file debt-instrument documents; the only ones that carry issuer LEIs for bonds
pub const DOCUMENT_PREFIX: &str = "FULINS_D";

pub const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLocation {
    pub file_name: String,
    pub url: String,
    pub publication_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexPage {
    pub num_found: usize,
    pub documents: Vec<DocumentLocation>,
}

/// Query URL for one page of the closed range `[from, to]`
pub fn query_url(base: &str, from: NaiveDate, to: NaiveDate, start: usize, rows: usize) -> String {
    format!(
        "{}/select?q=*&fq=publication_date:%5B{}T00:00:00Z+TO+{}T23:59:59Z%5D&wt=xml&indent=true&start={}&rows={}",
        base.trim_end_matches('/'),
        from.format("%Y-%m-%d"),
        to.format("%Y-%m-%d"),
        start,
        rows
    )
}

/// Parse one index page. Every listed document is returned; filtering by
/// prefix is left to `recognized`.
pub fn parse_index(body: &str, endpoint: &str) -> Result<IndexPage, FetchError> {
    let parse_err = |message: String| FetchError::Parse {
        endpoint: endpoint.to_string(),
        message,
    };

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut page = IndexPage::default();
    let mut in_doc = false;
    let mut field: Option<String> = None;
    let mut file_name = None;
    let mut url = None;
    let mut published = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"result" => {
                    if let Ok(Some(attr)) = e.try_get_attribute("numFound") {
                        let value = attr.unescape_value().map_err(|e| parse_err(e.to_string()))?;
                        page.num_found = value
                            .parse()
                            .map_err(|_| parse_err(format!("bad numFound {:?}", value)))?;
                    }
                }
                b"doc" => {
                    in_doc = true;
                    file_name = None;
                    url = None;
                    published = None;
                }
                _ if in_doc => {
                    field = match e.try_get_attribute("name") {
                        Ok(Some(attr)) => attr.unescape_value().ok().map(|v| v.into_owned()),
                        _ => None,
                    };
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Some(name) = field.as_deref() {
                    let text = t.unescape().map_err(|e| parse_err(e.to_string()))?;
                    let text = text.trim().to_string();
                    match name {
                        "file_name" => file_name = Some(text),
                        "download_link" => url = Some(text),
                        "publication_date" => {
                            published = text
                                .get(..10)
                                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"doc" {
                    in_doc = false;
                    if let (Some(file_name), Some(url)) = (file_name.take(), url.take()) {
                        page.documents.push(DocumentLocation {
                            file_name,
                            url,
                            publication_date: published.take(),
                        });
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(parse_err(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    Ok(page)
}

/// Documents with a recognized file-name prefix, index order kept
pub fn recognized(documents: Vec<DocumentLocation>) -> Vec<DocumentLocation> {
    documents
        .into_iter()
        .filter(|d| d.file_name.starts_with(DOCUMENT_PREFIX))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<response>
<lst name="responseHeader"><int name="status">0</int></lst>
<result name="response" numFound="3" start="0">
  <doc>
    <str name="checksum">8c1f</str>
    <str name="download_link">http://firds.esma.europa.eu/firds/FULINS_D_20200301_01of02.zip</str>
    <date name="publication_date">2020-03-01T00:00:00Z</date>
    <str name="file_name">FULINS_D_20200301_01of02.zip</str>
    <str name="file_type">FULINS</str>
  </doc>
  <doc>
    <str name="download_link">http://firds.esma.europa.eu/firds/FULINS_E_20200301_01of01.zip</str>
    <str name="file_name">FULINS_E_20200301_01of01.zip</str>
  </doc>
  <doc>
    <str name="download_link">http://firds.esma.europa.eu/firds/FULINS_D_20200301_02of02.zip</str>
    <date name="publication_date">2020-03-01T00:00:00Z</date>
    <str name="file_name">FULINS_D_20200301_02of02.zip</str>
  </doc>
</result>
</response>"#;

    #[test]
    fn test_query_url() {
        let url = query_url(
            "https://registers.esma.europa.eu/solr/esma_registers_firds_files/",
            NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 3, 2).unwrap(),
            0,
            PAGE_SIZE,
        );
        assert_eq!(
            url,
            "https://registers.esma.europa.eu/solr/esma_registers_firds_files/select?q=*\
             &fq=publication_date:%5B2020-03-01T00:00:00Z+TO+2020-03-02T23:59:59Z%5D\
             &wt=xml&indent=true&start=0&rows=100"
        );
    }

    #[test]
    fn test_parse_and_filter() {
        let page = parse_index(RESPONSE, "index").unwrap();
        assert_eq!(page.num_found, 3);
        assert_eq!(page.documents.len(), 3);
        assert_eq!(
            page.documents[0].publication_date,
            NaiveDate::from_ymd_opt(2020, 3, 1)
        );

        let docs = recognized(page.documents);
        let names: Vec<_> = docs.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["FULINS_D_20200301_01of02.zip", "FULINS_D_20200301_02of02.zip"]
        );
    }

    #[test]
    fn test_parse_garbage_is_error() {
        let result = parse_index("<response><result numFound=\"x\"></result></response>", "index");
        assert!(matches!(result, Err(FetchError::Parse { .. })));
    }
}
