//! Mutation engine: decode, apply field operations, re-linearize, verify

use crate::{
    error::{Error, Result},
    field::diff_fields,
    get_handler,
    tree::MAX_NODE_SIZE,
    updates::{EditOutcome, EditRequest, FieldOp},
    ContainerKind,
};

/// Apply `request` to a file of the given flavor.
///
/// Deletions are applied before assignments, so a key that is both deleted and set ends
/// up with the new value. Keys the flavor cannot store are reported in
/// [`EditOutcome::unsupported`]; they only fail the call when nothing else was
/// requested. The input buffer is never modified.
///
/// # Example
///
/// ```
/// use media_surgery::{edit, test_utils::flac, ContainerKind, EditRequest};
///
/// let file = flac::minimal();
/// let outcome = edit(&file, ContainerKind::Flac, &EditRequest::new().set("title", "X")).unwrap();
/// assert_eq!(outcome.changes.len(), 1);
/// assert!(outcome.output.unwrap().len() > file.len());
/// ```
pub fn edit(data: &[u8], flavor: ContainerKind, request: &EditRequest) -> Result<EditOutcome> {
    let handler = get_handler(flavor);
    let mut tree = handler.decode(data)?;

    if !flavor.info().can_edit {
        return Err(Error::NoEditableLocation {
            flavor,
            supported: ContainerKind::editable(),
        });
    }
    tree.ensure_intact()?;

    let mut ops = Vec::new();
    let mut unsupported = Vec::new();
    for key in request.deletions() {
        match handler.canonical_key(key) {
            Some(native) => ops.push(FieldOp::Delete { key: native }),
            None => unsupported.push(key.clone()),
        }
    }
    for (key, value) in request.assignments() {
        if value.len() as u64 > MAX_NODE_SIZE {
            return Err(Error::DataTooLarge {
                size: value.len(),
                max: MAX_NODE_SIZE as usize,
            });
        }
        match handler.canonical_key(key) {
            Some(native) => ops.push(FieldOp::Set { key: native, value: value.clone() }),
            None => unsupported.push(key.clone()),
        }
    }

    if ops.is_empty() {
        if let Some(key) = unsupported.first() {
            return Err(Error::UnsupportedField {
                key: key.clone(),
                flavor,
            });
        }
    }
    for key in &unsupported {
        log_warn!(%flavor, key = %key, "no native tag for key, skipped");
    }

    let before = handler.extract(&tree);
    if !ops.is_empty() {
        handler.apply_edits(&mut tree, &ops)?;
        handler.finalize(&mut tree)?;
    }
    let after = handler.extract(&tree);
    let changes = diff_fields(&before, &after);
    log_debug!(%flavor, ops = ops.len(), changes = changes.len(), "edit applied");

    if request.is_dry_run() {
        return Ok(EditOutcome {
            output: None,
            changes,
            unsupported,
        });
    }

    let output = handler.encode(&tree)?;
    verify(flavor, &output)?;
    log_debug!(%flavor, before = data.len(), after = output.len(), "edit encoded");

    Ok(EditOutcome {
        output: Some(output),
        changes,
        unsupported,
    })
}

/// Re-decode freshly written bytes with the same codec and refuse anything it cannot read
pub(crate) fn verify(flavor: ContainerKind, output: &[u8]) -> Result<()> {
    let check = get_handler(flavor).decode(output)?;
    check.ensure_intact()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[cfg(feature = "flac")]
    #[test]
    fn test_flac_title_inserted_after_streaminfo() {
        let file = test_utils::flac::minimal();
        let request = EditRequest::new().set("TITLE", "X");
        let outcome = edit(&file, ContainerKind::Flac, &request).unwrap();
        let out = outcome.output.unwrap();

        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].after.as_deref(), Some("X"));
        // STREAMINFO loses its last flag; the new block 4 carries it
        assert_eq!(out[4], 0x00);
        let second = 4 + 4 + 34;
        assert_eq!(out[second], 0x84);
        assert!(out.ends_with(test_utils::flac::FRAMES));
    }

    #[cfg(feature = "png")]
    #[test]
    fn test_png_author_replaced() {
        let file = test_utils::png::with_text(&[("Author", "Alice")]);
        let request = EditRequest::new().set("Author", "Bob");
        let outcome = edit(&file, ContainerKind::Png, &request).unwrap();
        let out = outcome.output.unwrap();

        assert_eq!(out.len(), file.len() - 2);
        let count = out.windows(4).filter(|w| *w == b"tEXt").count();
        assert_eq!(count, 1);
        assert!(out.windows(10).any(|w| w == b"Author\0Bob"));
        // IDAT and IEND are carried through untouched
        let idat = file.windows(4).position(|w| w == b"IDAT").unwrap() - 4;
        let idat_out = out.windows(4).position(|w| w == b"IDAT").unwrap() - 4;
        assert_eq!(&file[idat..], &out[idat_out..]);
    }

    #[cfg(feature = "flac")]
    #[test]
    fn test_set_twice_is_idempotent() {
        let file = test_utils::flac::with_comments(&[("ARTIST", "A")]);
        let request = EditRequest::new().set("title", "Same");
        let once = edit(&file, ContainerKind::Flac, &request).unwrap().output.unwrap();
        let twice = edit(&once, ContainerKind::Flac, &request).unwrap();

        assert!(twice.changes.is_empty());
        assert_eq!(twice.output.unwrap(), once);
        let report = crate::view(&once, ContainerKind::Flac).unwrap();
        assert_eq!(report.fields.iter().filter(|f| f.key == "TITLE").count(), 1);
    }

    #[cfg(feature = "flac")]
    #[test]
    fn test_delete_absent_key_is_noop() {
        let file = test_utils::flac::with_comments(&[("ARTIST", "A")]);
        let request = EditRequest::new().delete("GENRE");
        let outcome = edit(&file, ContainerKind::Flac, &request).unwrap();
        assert!(outcome.changes.is_empty());
        assert_eq!(outcome.output.unwrap(), file);
    }

    #[cfg(feature = "png")]
    #[test]
    fn test_empty_request_round_trips() {
        let file = test_utils::png::with_text(&[("Title", "T"), ("Author", "A")]);
        let outcome = edit(&file, ContainerKind::Png, &EditRequest::new()).unwrap();
        assert_eq!(outcome.output.unwrap(), file);
    }

    #[cfg(feature = "flac")]
    #[test]
    fn test_dry_run_reports_without_output() {
        let file = test_utils::flac::minimal();
        let request = EditRequest::new().set("ALBUM", "Record").dry_run(true);
        let outcome = edit(&file, ContainerKind::Flac, &request).unwrap();
        assert!(outcome.output.is_none());
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].before, None);
    }

    #[cfg(feature = "bmff")]
    #[test]
    fn test_unsupported_key_only_fails() {
        let file = test_utils::bmff::file_with_title(Some("Old"), true);
        let request = EditRequest::new().set("no such key", "x");
        let err = edit(&file, ContainerKind::Bmff, &request).unwrap_err();
        assert!(matches!(err, Error::UnsupportedField { .. }));

        let request = EditRequest::new().set("no such key", "x").set("title", "New");
        let outcome = edit(&file, ContainerKind::Bmff, &request).unwrap();
        assert_eq!(outcome.unsupported, vec!["no such key".to_string()]);
        assert_eq!(outcome.changes.len(), 1);
    }

    #[cfg(feature = "ebml")]
    #[test]
    fn test_matroska_is_not_editable() {
        let file = test_utils::ebml::matroska("Film", &[]);
        let request = EditRequest::new().set("title", "x");
        let err = edit(&file, ContainerKind::Ebml, &request).unwrap_err();
        match err {
            Error::NoEditableLocation { flavor, supported } => {
                assert_eq!(flavor, ContainerKind::Ebml);
                assert!(!supported.contains(&ContainerKind::Ebml));
                assert!(!supported.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(feature = "png")]
    #[test]
    fn test_wrong_flavor_fails_first() {
        let file = test_utils::png::with_text(&[]);
        #[cfg(feature = "flac")]
        assert!(matches!(
            edit(&file, ContainerKind::Flac, &EditRequest::new().set("TITLE", "x")),
            Err(Error::NotThisFormat { .. })
        ));
        let mut damaged = file.clone();
        damaged.truncate(30);
        assert!(matches!(
            edit(&damaged, ContainerKind::Png, &EditRequest::new().set("Title", "x")),
            Err(Error::MalformedContainer { .. } | Error::Truncated { .. })
        ));
    }
}
