//! Protocol Module Tests
//!
//! Validates the command and reply vocabulary against the literal wire strings.
//!
//! ## Test Scopes
//! - **Command parsing**: Verbs, field counts, identifiers and body decoding.
//! - **Reply encoding**: The exact `OK|...` / `ERROR|...` frames each tier emits.
//! - **Reply parsing**: Clients must reject anything that is not a well-formed reply.

#[cfg(test)]
mod tests {
    use crate::protocol::frame::encode_body;
    use crate::protocol::types::{LatestRecord, ListEntry, RecordView, StatsSummary};
    use crate::protocol::{ClientId, Command, ErrorReason, ProtocolError, Reply};
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    // ============================================================
    // COMMAND PARSING
    // ============================================================

    #[test]
    fn test_parse_upload_decodes_body() {
        let frame = format!("UPLOAD|report.txt|alice|{}", encode_body("hello"));

        let command = Command::parse(&frame).unwrap();

        assert_eq!(
            command,
            Command::Upload {
                name: "report.txt".to_string(),
                author: ClientId::new("alice"),
                content: "hello".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_verb_is_case_insensitive() {
        let command = Command::parse("open|report.txt|alice").unwrap();

        assert_eq!(
            command,
            Command::Open {
                name: "report.txt".to_string(),
                client_id: ClientId::new("alice"),
            }
        );
    }

    #[test]
    fn test_parse_discovery_and_handshake() {
        assert_eq!(
            Command::parse("PRIJAVA|alice").unwrap(),
            Command::Announce {
                client_id: ClientId::new("alice")
            }
        );
        assert_eq!(
            Command::parse("HELLO|alice").unwrap(),
            Command::Hello {
                client_id: ClientId::new("alice")
            }
        );
    }

    #[test]
    fn test_parse_wrong_field_count_is_bad_format() {
        let err = Command::parse("OPEN|report.txt").unwrap_err();

        assert!(matches!(err, ProtocolError::FieldCount { verb: "OPEN", .. }));
        assert_eq!(err.reason(), ErrorReason::BadFormat);
    }

    #[test]
    fn test_parse_unknown_verb() {
        let err = Command::parse("RENAME|a|b").unwrap_err();

        assert_eq!(err.reason(), ErrorReason::UnknownCommand);
    }

    #[test]
    fn test_parse_empty_identifier_is_bad_format() {
        let err = Command::parse("CLOSE|report.txt|").unwrap_err();

        assert_eq!(err, ProtocolError::BadClientId("CLOSE"));
    }

    #[test]
    fn test_parse_upload_keeps_empty_name_for_store_validation() {
        let frame = format!("UPLOAD||alice|{}", encode_body("x"));

        match Command::parse(&frame).unwrap() {
            Command::Upload { name, .. } => assert!(name.is_empty()),
            other => panic!("Wrong command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_edit_with_invalid_body() {
        let err = Command::parse("EDIT|a.txt|alice|***").unwrap_err();

        assert!(matches!(err, ProtocolError::BadBody(_)));
    }

    #[test]
    fn test_parse_stats_variants() {
        assert_eq!(
            Command::parse("STATS").unwrap(),
            Command::Stats {
                client_id: None,
                after: None
            }
        );
        assert_eq!(
            Command::parse("STATS|alice|2024-01-01").unwrap(),
            Command::Stats {
                client_id: Some(ClientId::new("alice")),
                after: NaiveDate::from_ymd_opt(2024, 1, 1),
            }
        );
        // Unparseable cutoff is ignored rather than rejected
        assert_eq!(
            Command::parse("STATS|alice|yesterday").unwrap(),
            Command::Stats {
                client_id: Some(ClientId::new("alice")),
                after: None
            }
        );
    }

    #[test]
    fn test_command_frame_is_parseable() {
        let commands = vec![
            Command::Edit {
                name: "x.txt".to_string(),
                client_id: ClientId::new("bob"),
                content: "hello world".to_string(),
            },
            Command::Stats {
                client_id: None,
                after: NaiveDate::from_ymd_opt(2024, 5, 2),
            },
            Command::ReleaseAll {
                client_id: ClientId::new("bob"),
            },
        ];

        for command in commands {
            assert_eq!(Command::parse(&command.to_frame()).unwrap(), command);
        }
    }

    #[test]
    fn test_client_id_learning_source() {
        let upload = Command::parse(&format!("UPLOAD|a|alice|{}", encode_body(""))).unwrap();
        assert_eq!(upload.client_id(), Some(&ClientId::new("alice")));
        assert_eq!(Command::parse("LIST").unwrap().client_id(), None);
        assert_eq!(Command::parse("DOWNLOAD|a").unwrap().client_id(), None);
    }

    // ============================================================
    // REPLY ENCODING
    // ============================================================

    #[test]
    fn test_reply_literal_frames() {
        assert_eq!(Reply::Uploaded.to_frame(), "OK|UPLOADED");
        assert_eq!(Reply::Opened.to_frame(), "OK|OPENED");
        assert_eq!(Reply::Edited.to_frame(), "OK|EDITED");
        assert_eq!(Reply::Closed.to_frame(), "OK|CLOSED");
        assert_eq!(Reply::List(vec![]).to_frame(), "OK|LIST|EMPTY");
        assert_eq!(Reply::Announce { port: 19010 }.to_frame(), "OK|PRIJAVA|19010");
        assert_eq!(
            Reply::Error(ErrorReason::AlreadyExists).to_frame(),
            "ERROR|ALREADY_EXISTS"
        );
        assert_eq!(
            Reply::Error(ErrorReason::LockedBy(ClientId::new("bob"))).to_frame(),
            "ERROR|LOCKED_BY|bob"
        );
    }

    #[test]
    fn test_download_reply_frame() {
        let reply = Reply::Download(RecordView {
            author: ClientId::new("alice"),
            last_modified: ts("2024-01-01 10:00:00"),
            content: "hello".to_string(),
        });

        assert_eq!(
            reply.to_frame(),
            format!("OK|DOWNLOAD|alice|2024-01-01 10:00:00|{}", encode_body("hello"))
        );
    }

    #[test]
    fn test_list_reply_frame() {
        let reply = Reply::List(vec![
            ListEntry {
                name: "a.txt".to_string(),
                author: ClientId::new("alice"),
                last_modified: ts("2024-01-01 10:00:00"),
                locked: true,
            },
            ListEntry {
                name: "b.txt".to_string(),
                author: ClientId::new("bob"),
                last_modified: ts("2024-01-02 11:30:00"),
                locked: false,
            },
        ]);

        assert_eq!(
            reply.to_frame(),
            "OK|LIST|a.txt,alice,2024-01-01 10:00:00,true;b.txt,bob,2024-01-02 11:30:00,false"
        );
        assert_eq!(Reply::parse(&reply.to_frame()).unwrap(), reply);
    }

    #[test]
    fn test_stats_reply_frame() {
        let summary = StatsSummary {
            my_files: 11,
            latest_after: Some(LatestRecord {
                name: "x.txt".to_string(),
                author: ClientId::new("alice"),
                last_modified: ts("2024-03-01 09:00:00"),
            }),
            totals: vec![(ClientId::new("alice"), 11), (ClientId::new("bob"), 4)],
        };
        let reply = Reply::Stats(summary);

        assert_eq!(
            reply.to_frame(),
            concat!(
                "OK|STATS|MY_FILES=11|LATEST_AFTER=x.txt,alice,2024-03-01 09:00:00",
                "|TOTALS=alice:11;bob:4"
            )
        );
        assert_eq!(Reply::parse(&reply.to_frame()).unwrap(), reply);

        let empty = Reply::Stats(StatsSummary::default());
        assert_eq!(
            empty.to_frame(),
            "OK|STATS|MY_FILES=0|LATEST_AFTER=NONE|TOTALS=NONE"
        );
    }

    // ============================================================
    // REPLY PARSING
    // ============================================================

    #[test]
    fn test_parse_legacy_rejection() {
        let reply = Reply::parse("ERROR|ODBIJENO").unwrap();

        assert_eq!(reply, Reply::Error(ErrorReason::Rejected));
        assert!(reply.error_reason().unwrap().is_lock_conflict());
    }

    #[test]
    fn test_parse_rejects_short_and_unknown_replies() {
        for frame in ["", "OK", "OK|DOWNLOAD|alice", "ERROR|LOCKED_BY", "ERROR|WHATEVER", "HELLO"] {
            assert!(
                matches!(Reply::parse(frame), Err(ProtocolError::MalformedReply(_))),
                "{frame:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_reply_answers_matching_command() {
        let open = Command::Open {
            name: "x".to_string(),
            client_id: ClientId::new("a"),
        };

        assert!(Reply::Opened.answers(&open));
        assert!(Reply::Error(ErrorReason::NotFound).answers(&open));
        assert!(!Reply::Closed.answers(&open));
        assert!(!Reply::Uploaded.answers(&Command::List));
    }
}
