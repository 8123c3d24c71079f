//! Validation of log-table declarations into event model metadata.

use tracing::{debug, info};

use crate::bridge::BridgeRegistry;
use crate::declaration::{LogTableDeclaration, MemberDeclaration, ModelDeclaration};
use crate::error::ModelError;
use crate::info::{validate_naming, EventModelInfo, IdInfo, DEFAULT_UPDATE_ID_COLUMN};

/// Parse declarations into event model metadata.
///
/// Output order follows the iteration order of `declarations`. Any
/// violation fails the whole parse; no partial result is returned.
pub fn parse_declarations<'a, I>(
    declarations: I,
    registry: &BridgeRegistry,
) -> Result<Vec<EventModelInfo>, ModelError>
where
    I: IntoIterator<Item = &'a LogTableDeclaration>,
{
    let infos = declarations
        .into_iter()
        .map(|decl| parse_table(decl, registry))
        .collect::<Result<Vec<_>, _>>()?;
    validate_naming(&infos)?;
    info!(tables = infos.len(), "Parsed event model");
    Ok(infos)
}

impl ModelDeclaration {
    /// Parse every declared log table with the given bridges.
    pub fn parse(&self, registry: &BridgeRegistry) -> Result<Vec<EventModelInfo>, ModelError> {
        parse_declarations(&self.log_tables, registry)
    }
}

fn parse_table(
    decl: &LogTableDeclaration,
    registry: &BridgeRegistry,
) -> Result<EventModelInfo, ModelError> {
    let table = decl.update_table.as_str();
    let marked: Vec<&MemberDeclaration> = decl.members.iter().filter(|m| m.has_marker()).collect();

    if let Some(first) = marked.first() {
        if marked.iter().any(|m| m.kind != first.kind) {
            return Err(ModelError::MixedMemberKinds {
                table: table.to_string(),
            });
        }
    }

    if let Some(member) = marked.iter().find(|m| m.event && m.id_for.is_some()) {
        return Err(ModelError::EventAndIdOnSameMember {
            table: table.to_string(),
            member: member.name.clone(),
        });
    }

    let event_members: Vec<&&MemberDeclaration> = marked.iter().filter(|m| m.event).collect();
    let event_member = match event_members.as_slice() {
        [] => {
            return Err(ModelError::MissingEventType {
                table: table.to_string(),
            })
        }
        [single] => *single,
        many => {
            return Err(ModelError::DuplicateEventType {
                table: table.to_string(),
                members: many.iter().map(|m| m.name.clone()).collect(),
            })
        }
    };

    let update_id_members: Vec<&&MemberDeclaration> = marked.iter().filter(|m| m.update_id).collect();
    let update_id_column = match update_id_members.as_slice() {
        [] => DEFAULT_UPDATE_ID_COLUMN.to_string(),
        [single] => single.column_name().to_string(),
        many => {
            return Err(ModelError::DuplicateUpdateId {
                table: table.to_string(),
                members: many.iter().map(|m| m.name.clone()).collect(),
            })
        }
    };

    let mut builder = EventModelInfo::builder(&decl.update_table, &decl.original_table)
        .event_type_column(event_member.column_name())
        .update_id_column(update_id_column);

    for member in &marked {
        let Some(marker) = &member.id_for else {
            continue;
        };
        let columns_in_update_table = if marker.columns_in_update_table.is_empty() {
            vec![member.column_name().to_string()]
        } else {
            marker.columns_in_update_table.clone()
        };
        let columns_in_original = if marker.columns_in_original.is_empty() {
            columns_in_update_table.clone()
        } else {
            marker.columns_in_original.clone()
        };
        let bridge = registry.get(&marker.bridge)?;

        let mut id_info = IdInfo::new(
            &marker.entity_class,
            columns_in_update_table,
            columns_in_original,
            bridge,
        )?
        .with_hints(marker.hints.clone());
        if !marker.column_types.is_empty() {
            id_info = id_info.with_column_types(marker.column_types.clone())?;
        }

        debug!(
            table,
            entity_class = %marker.entity_class,
            bridge = %marker.bridge,
            "Declared id info"
        );
        builder = builder.id_info(id_info);
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::IdForMarker;
    use crate::info::ColumnType;

    fn place_table() -> LogTableDeclaration {
        LogTableDeclaration::new("place_updates", "place")
            .member(MemberDeclaration::field("event_type").event())
            .member(MemberDeclaration::field("place_id").id_for(IdForMarker::new("Place")))
    }

    fn sorcerer_table() -> LogTableDeclaration {
        LogTableDeclaration::new("sorcerer_updates", "sorcerer")
            .member(MemberDeclaration::field("kind").event())
            .member(MemberDeclaration::field("seq").update_id())
            .member(
                MemberDeclaration::field("sorcerer_id").id_for(
                    IdForMarker::new("Sorcerer")
                        .columns(&["sorcerer_id"], &["id"])
                        .bridge("string"),
                ),
            )
    }

    #[test]
    fn test_parse_preserves_order() {
        let registry = BridgeRegistry::with_builtins();
        let decls = vec![sorcerer_table(), place_table()];
        let infos = parse_declarations(&decls, &registry).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].update_table_name(), "sorcerer_updates");
        assert_eq!(infos[1].update_table_name(), "place_updates");

        assert_eq!(infos[0].event_type_column(), "kind");
        assert_eq!(infos[0].update_id_column(), "seq");
        assert_eq!(infos[0].id_infos()[0].columns_in_original(), ["id"]);
        assert_eq!(infos[0].id_infos()[0].bridge().name(), "string");

        assert_eq!(infos[1].update_id_column(), "update_id");
        assert_eq!(infos[1].id_infos()[0].columns_in_original(), ["place_id"]);
    }

    #[test]
    fn test_missing_event_type() {
        let decl = LogTableDeclaration::new("place_updates", "place")
            .member(MemberDeclaration::field("place_id").id_for(IdForMarker::new("Place")));
        let err = parse_declarations([&decl], &BridgeRegistry::default()).unwrap_err();
        assert!(matches!(err, ModelError::MissingEventType { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_duplicate_event_type() {
        let decl = place_table().member(MemberDeclaration::field("other").event());
        let err = parse_declarations([&decl], &BridgeRegistry::default()).unwrap_err();
        match err {
            ModelError::DuplicateEventType { members, .. } => {
                assert_eq!(members, vec!["event_type".to_string(), "other".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_update_id() {
        let decl = place_table()
            .member(MemberDeclaration::field("seq").update_id())
            .member(MemberDeclaration::field("seq2").update_id());
        let err = parse_declarations([&decl], &BridgeRegistry::default()).unwrap_err();
        match err {
            ModelError::DuplicateUpdateId { table, members } => {
                assert_eq!(table, "place_updates");
                assert_eq!(members, vec!["seq".to_string(), "seq2".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_id_info() {
        let decl = LogTableDeclaration::new("place_updates", "place")
            .member(MemberDeclaration::field("event_type").event());
        let err = parse_declarations([&decl], &BridgeRegistry::default()).unwrap_err();
        assert!(matches!(err, ModelError::MissingIdInfo { .. }));
    }

    #[test]
    fn test_mixed_member_kinds() {
        let decl = LogTableDeclaration::new("place_updates", "place")
            .member(MemberDeclaration::field("event_type").event())
            .member(MemberDeclaration::accessor("getPlaceId").id_for(IdForMarker::new("Place")));
        let err = parse_declarations([&decl], &BridgeRegistry::default()).unwrap_err();
        assert!(matches!(err, ModelError::MixedMemberKinds { .. }));
    }

    #[test]
    fn test_unmarked_members_do_not_count_as_mixed() {
        let decl = place_table().member(MemberDeclaration::accessor("toString"));
        assert!(parse_declarations([&decl], &BridgeRegistry::default()).is_ok());
    }

    #[test]
    fn test_event_and_id_on_same_member() {
        let decl = LogTableDeclaration::new("place_updates", "place").member(
            MemberDeclaration::field("both")
                .event()
                .id_for(IdForMarker::new("Place")),
        );
        let err = parse_declarations([&decl], &BridgeRegistry::default()).unwrap_err();
        assert!(matches!(err, ModelError::EventAndIdOnSameMember { .. }));
    }

    #[test]
    fn test_arity_mismatch() {
        let decl = LogTableDeclaration::new("place_updates", "place")
            .member(MemberDeclaration::field("event_type").event())
            .member(
                MemberDeclaration::field("place_id").id_for(
                    IdForMarker::new("Place")
                        .columns(&["a", "b"], &["a"])
                        .bridge("composite"),
                ),
            );
        let err = parse_declarations([&decl], &BridgeRegistry::default()).unwrap_err();
        assert!(matches!(err, ModelError::ArityMismatch { .. }));
    }

    #[test]
    fn test_column_types_applied() {
        let mut marker = IdForMarker::new("Place").bridge("string");
        marker.column_types = vec![ColumnType::Varchar(36)];
        let decl = LogTableDeclaration::new("place_updates", "place")
            .member(MemberDeclaration::field("event_type").event())
            .member(MemberDeclaration::field("place_id").id_for(marker));
        let infos = parse_declarations([&decl], &BridgeRegistry::default()).unwrap();
        assert_eq!(
            infos[0].id_infos()[0].column_types(),
            [ColumnType::Varchar(36)]
        );
    }

    #[test]
    fn test_unknown_bridge() {
        let decl = LogTableDeclaration::new("place_updates", "place")
            .member(MemberDeclaration::field("event_type").event())
            .member(MemberDeclaration::field("place_id").id_for(IdForMarker::new("Place").bridge("uuid")));
        let err = parse_declarations([&decl], &BridgeRegistry::default()).unwrap_err();
        assert!(matches!(err, ModelError::UnknownBridge(name) if name == "uuid"));
    }

    #[test]
    fn test_duplicate_update_table() {
        let decls = vec![place_table(), place_table()];
        let err = parse_declarations(&decls, &BridgeRegistry::default()).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateUpdateTable(_)));
    }

    #[test]
    fn test_update_table_named_like_other_original() {
        let other = LogTableDeclaration::new("audit_updates", "place_updates")
            .member(MemberDeclaration::field("event_type").event())
            .member(MemberDeclaration::field("audit_id").id_for(IdForMarker::new("Audit")));
        let decls = vec![place_table(), other];
        let err = parse_declarations(&decls, &BridgeRegistry::default()).unwrap_err();
        assert!(matches!(err, ModelError::NamingConflict { .. }));
    }

    #[test]
    fn test_model_declaration_parse() {
        let model = ModelDeclaration {
            log_tables: vec![place_table()],
        };
        let infos = model.parse(&BridgeRegistry::default()).unwrap();
        assert_eq!(infos[0].original_table_name(), "place");
    }
}
