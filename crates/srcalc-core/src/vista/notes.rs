//! Reference notes returned as XML.
//!
//! ```xml
//! <notes>
//!   <note localTitle="NURSING ADMISSION EVALUATION NOTE" signDate="02/02/2015">
//!     <body>Patient ambulates independently.</body>
//!   </note>
//! </notes>
//! ```

use crate::patient::ReferenceNote;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct NotesDocument {
    #[serde(rename = "note", default)]
    notes: Vec<NoteElement>,
}

#[derive(Debug, Deserialize)]
struct NoteElement {
    #[serde(rename = "@localTitle")]
    local_title: String,
    #[serde(rename = "@signDate")]
    sign_date: String,
    #[serde(default)]
    body: String,
}

/// Parse the notes document. The response lines are joined with newlines
/// first.
pub fn parse_reference_notes(lines: &[String]) -> Result<Vec<ReferenceNote>, quick_xml::DeError> {
    let document: NotesDocument = quick_xml::de::from_str(&lines.join("\n"))?;
    Ok(document
        .notes
        .into_iter()
        .map(|note| ReferenceNote {
            local_title: note.local_title,
            sign_date: note.sign_date,
            body: note.body.trim().to_string(),
        })
        .collect())
}
