use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use tracing::debug;

use crate::object::{Object, ObjectRegistry, RenderableKind};

const SPRITE_PREFIX: &str = "Sprite:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorCode {
    ReadFile,
    XmlMalformed,
    InvalidRoot,
    UnknownDefType,
    UnknownField,
    DuplicateField,
    MissingField,
    InvalidValue,
    DuplicateAction,
    DuplicateDef,
}

#[derive(Debug, Clone)]
pub struct ContentLoadError {
    pub code: ContentErrorCode,
    pub message: String,
    pub file_path: PathBuf,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for ContentLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (file={}, line={}, column={})",
                self.code,
                self.message,
                self.file_path.display(),
                loc.line,
                loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (file={})",
                self.code,
                self.message,
                self.file_path.display()
            ),
        }
    }
}

impl std::error::Error for ContentLoadError {}

#[derive(Debug, Clone)]
struct PendingAction {
    name: String,
    duration_ms: u32,
    moves: bool,
}

/// Loads every `*.xml` file under `dir` into a registry. Object ids follow
/// defName order so they are stable across file layouts.
pub fn load_object_registry(dir: &Path) -> Result<ObjectRegistry, ContentLoadError> {
    let xml_files = collect_xml_files_sorted(dir)
        .map_err(|error| read_error(error.path, error.source))?;

    let mut merged = BTreeMap::<String, Object>::new();
    for xml_file in xml_files {
        let raw = fs::read_to_string(&xml_file)
            .map_err(|source| read_error(xml_file.clone(), source))?;
        for object in parse_objects_document(&xml_file, &raw)? {
            if merged.contains_key(object.def_name()) {
                return Err(ContentLoadError {
                    code: ContentErrorCode::DuplicateDef,
                    message: format!(
                        "duplicate ObjectDef '{}'; each defName may be defined only once",
                        object.def_name()
                    ),
                    file_path: xml_file.clone(),
                    location: None,
                });
            }
            merged.insert(object.def_name().to_string(), object);
        }
    }

    debug!(dir = %dir.display(), object_count = merged.len(), "object_defs_loaded");
    Ok(ObjectRegistry::from_objects(merged.into_values().collect()))
}

/// Parses one `<Defs>` document. `file_path` is only used for error reports.
pub fn parse_objects_document(file_path: &Path, raw: &str) -> Result<Vec<Object>, ContentLoadError> {
    let doc = Document::parse(raw).map_err(|error| ContentLoadError {
        code: ContentErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;
    let cx = Cx {
        file_path,
        doc: &doc,
    };

    let root = doc.root_element();
    if root.tag_name().name() != "Defs" {
        return Err(cx.error_at(
            ContentErrorCode::InvalidRoot,
            "root element must be <Defs>".to_string(),
            root,
        ));
    }

    let mut objects = Vec::<Object>::new();
    for child in root.children().filter(|node| node.is_element()) {
        if child.tag_name().name() != "ObjectDef" {
            return Err(cx.error_at(
                ContentErrorCode::UnknownDefType,
                format!(
                    "unsupported def type <{}>; only <ObjectDef> is supported",
                    child.tag_name().name()
                ),
                child,
            ));
        }
        objects.push(parse_object_def(&cx, child)?);
    }

    Ok(objects)
}

struct Cx<'a, 'input> {
    file_path: &'a Path,
    doc: &'a Document<'input>,
}

impl Cx<'_, '_> {
    fn error_at(&self, code: ContentErrorCode, message: String, node: Node<'_, '_>) -> ContentLoadError {
        let pos = self.doc.text_pos_at(node.range().start);
        ContentLoadError {
            code,
            message,
            file_path: self.file_path.to_path_buf(),
            location: Some(SourceLocation {
                line: pos.row as usize,
                column: pos.col as usize,
            }),
        }
    }

    fn required_text(&self, node: Node<'_, '_>, field_name: &str) -> Result<String, ContentLoadError> {
        let value = node.text().map(str::trim).unwrap_or_default().to_string();
        if value.is_empty() {
            return Err(self.error_at(
                ContentErrorCode::MissingField,
                format!("field <{}> must not be empty", field_name),
                node,
            ));
        }
        Ok(value)
    }

    fn missing(&self, field_name: &str, parent: &str, node: Node<'_, '_>) -> ContentLoadError {
        self.error_at(
            ContentErrorCode::MissingField,
            format!("missing required field <{}> in <{}>", field_name, parent),
            node,
        )
    }
}

fn parse_object_def(cx: &Cx<'_, '_>, node: Node<'_, '_>) -> Result<Object, ContentLoadError> {
    let mut seen_fields = HashSet::<String>::new();
    let mut def_name: Option<String> = None;
    let mut label: Option<String> = None;
    let mut renderable: Option<RenderableKind> = None;
    let mut actions = Vec::<PendingAction>::new();
    let mut attributes = Vec::<(String, String)>::new();

    for field in node.children().filter(|child| child.is_element()) {
        let field_name = field.tag_name().name().to_string();
        if !seen_fields.insert(field_name.clone()) {
            return Err(cx.error_at(
                ContentErrorCode::DuplicateField,
                format!("duplicate field <{}> in <ObjectDef>", field_name),
                field,
            ));
        }

        match field_name.as_str() {
            "defName" => def_name = Some(cx.required_text(field, "defName")?),
            "label" => label = Some(cx.required_text(field, "label")?),
            "renderable" => renderable = Some(parse_renderable(cx, field)?),
            "actions" => actions = parse_actions(cx, field)?,
            "attributes" => attributes = parse_attributes(cx, field)?,
            _ => {
                return Err(cx.error_at(
                    ContentErrorCode::UnknownField,
                    format!("unknown field <{}> in <ObjectDef>", field_name),
                    field,
                ))
            }
        }
    }

    let def_name = def_name.ok_or_else(|| cx.missing("defName", "ObjectDef", node))?;
    let label = label.ok_or_else(|| cx.missing("label", "ObjectDef", node))?;
    let renderable = renderable.ok_or_else(|| cx.missing("renderable", "ObjectDef", node))?;

    let mut object = Object::new(def_name, label, renderable);
    for action in actions {
        object.add_action(action.name, action.duration_ms, action.moves);
    }
    for (key, value) in attributes {
        object.set_attribute(key, value);
    }
    Ok(object)
}

fn parse_renderable(cx: &Cx<'_, '_>, field: Node<'_, '_>) -> Result<RenderableKind, ContentLoadError> {
    let value = cx.required_text(field, "renderable")?;
    if value == "Placeholder" {
        return Ok(RenderableKind::Placeholder);
    }
    match value.strip_prefix(SPRITE_PREFIX).map(str::trim) {
        Some(key) if !key.is_empty() => Ok(RenderableKind::Sprite(key.to_string())),
        _ => Err(cx.error_at(
            ContentErrorCode::InvalidValue,
            format!(
                "invalid renderable '{}'; allowed values: Placeholder, Sprite:<key>",
                value
            ),
            field,
        )),
    }
}

fn parse_actions(cx: &Cx<'_, '_>, node: Node<'_, '_>) -> Result<Vec<PendingAction>, ContentLoadError> {
    let mut actions = Vec::<PendingAction>::new();
    for child in node.children().filter(|child| child.is_element()) {
        if child.tag_name().name() != "ActionDef" {
            return Err(cx.error_at(
                ContentErrorCode::UnknownField,
                format!(
                    "unexpected <{}> in <actions>; expected <ActionDef>",
                    child.tag_name().name()
                ),
                child,
            ));
        }
        let action = parse_action_def(cx, child)?;
        if actions.iter().any(|existing| existing.name == action.name) {
            return Err(cx.error_at(
                ContentErrorCode::DuplicateAction,
                format!("duplicate action '{}' in <actions>", action.name),
                child,
            ));
        }
        actions.push(action);
    }
    Ok(actions)
}

fn parse_action_def(cx: &Cx<'_, '_>, node: Node<'_, '_>) -> Result<PendingAction, ContentLoadError> {
    let mut seen_fields = HashSet::<String>::new();
    let mut name: Option<String> = None;
    let mut duration_ms: Option<u32> = None;
    let mut moves: Option<bool> = None;

    for field in node.children().filter(|child| child.is_element()) {
        let field_name = field.tag_name().name().to_string();
        if !seen_fields.insert(field_name.clone()) {
            return Err(cx.error_at(
                ContentErrorCode::DuplicateField,
                format!("duplicate field <{}> in <ActionDef>", field_name),
                field,
            ));
        }

        match field_name.as_str() {
            "name" => name = Some(cx.required_text(field, "name")?),
            "durationMs" => {
                let value = cx.required_text(field, "durationMs")?;
                let parsed = value.parse::<u32>().map_err(|_| {
                    cx.error_at(
                        ContentErrorCode::InvalidValue,
                        format!("durationMs '{}' is not a non-negative integer", value),
                        field,
                    )
                })?;
                duration_ms = Some(parsed);
            }
            "moves" => {
                let value = cx.required_text(field, "moves")?;
                let parsed = match value.as_str() {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(cx.error_at(
                            ContentErrorCode::InvalidValue,
                            format!("moves '{}' must be true or false", value),
                            field,
                        ))
                    }
                };
                moves = Some(parsed);
            }
            _ => {
                return Err(cx.error_at(
                    ContentErrorCode::UnknownField,
                    format!("unknown field <{}> in <ActionDef>", field_name),
                    field,
                ))
            }
        }
    }

    let name = name.ok_or_else(|| cx.missing("name", "ActionDef", node))?;
    Ok(PendingAction {
        name,
        duration_ms: duration_ms.unwrap_or(0),
        moves: moves.unwrap_or(true),
    })
}

fn parse_attributes(
    cx: &Cx<'_, '_>,
    node: Node<'_, '_>,
) -> Result<Vec<(String, String)>, ContentLoadError> {
    let mut attributes = Vec::<(String, String)>::new();
    for child in node.children().filter(|child| child.is_element()) {
        let key = child.tag_name().name().to_string();
        if key == "id" {
            return Err(cx.error_at(
                ContentErrorCode::InvalidValue,
                "attribute <id> is reserved for the instance identifier".to_string(),
                child,
            ));
        }
        if attributes.iter().any(|(existing, _)| *existing == key) {
            return Err(cx.error_at(
                ContentErrorCode::DuplicateField,
                format!("duplicate attribute <{}> in <attributes>", key),
                child,
            ));
        }
        let value = child.text().map(str::trim).unwrap_or_default().to_string();
        attributes.push((key, value));
    }
    Ok(attributes)
}

struct ReadError {
    path: PathBuf,
    source: std::io::Error,
}

fn collect_xml_files_sorted(root: &Path) -> Result<Vec<PathBuf>, ReadError> {
    let mut files = Vec::<PathBuf>::new();
    collect_recursive(root, &mut files)?;
    files.sort_by_cached_key(|path| {
        normalize_rel_path(path.strip_prefix(root).unwrap_or(path.as_path()))
    });
    Ok(files)
}

fn collect_recursive(current: &Path, files: &mut Vec<PathBuf>) -> Result<(), ReadError> {
    let entries = fs::read_dir(current).map_err(|source| ReadError {
        path: current.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ReadError {
            path: current.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, files)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_error(path: PathBuf, source: std::io::Error) -> ContentLoadError {
    ContentLoadError {
        code: ContentErrorCode::ReadFile,
        message: format!("failed to read XML content: {source}"),
        file_path: path,
        location: None,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write");
    }

    fn parse(raw: &str) -> Result<Vec<Object>, ContentLoadError> {
        parse_objects_document(Path::new("objects.xml"), raw)
    }

    #[test]
    fn full_object_def_parses() {
        let objects = parse(
            r#"<Defs>
                <ObjectDef>
                    <defName>proto.villager</defName>
                    <label>Villager</label>
                    <renderable>Sprite:villager</renderable>
                    <actions>
                        <ActionDef><name>walk</name></ActionDef>
                        <ActionDef><name>wave</name><durationMs>800</durationMs><moves>false</moves></ActionDef>
                    </actions>
                    <attributes><faction>town</faction><note/></attributes>
                </ObjectDef>
            </Defs>"#,
        )
        .expect("parse");

        assert_eq!(objects.len(), 1);
        let villager = &objects[0];
        assert_eq!(villager.def_name(), "proto.villager");
        assert_eq!(
            villager.renderable(),
            &RenderableKind::Sprite("villager".to_string())
        );
        let walk = villager.action_by_name("walk").expect("walk");
        assert_eq!((walk.duration_ms, walk.moves), (0, true));
        let wave = villager.action_by_name("wave").expect("wave");
        assert_eq!((wave.duration_ms, wave.moves), (800, false));
        assert_eq!(villager.default_action().map(|a| a.name.as_str()), Some("walk"));
        assert_eq!(villager.attribute("faction"), Some("town"));
        assert_eq!(villager.attribute("note"), Some(""));
    }

    #[test]
    fn missing_def_name_reports_file_and_location() {
        let err = parse(
            r#"<Defs><ObjectDef><label>X</label><renderable>Placeholder</renderable></ObjectDef></Defs>"#,
        )
        .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::MissingField);
        assert_eq!(err.file_path, Path::new("objects.xml"));
        assert!(err.location.is_some());
    }

    #[test]
    fn invalid_root_and_def_type_error() {
        let err = parse("<Things/>").expect_err("root");
        assert_eq!(err.code, ContentErrorCode::InvalidRoot);

        let err = parse("<Defs><EntityDef/></Defs>").expect_err("type");
        assert_eq!(err.code, ContentErrorCode::UnknownDefType);
    }

    #[test]
    fn malformed_xml_reports_location() {
        let err = parse("<Defs><ObjectDef><defName>a</defName></Defs>").expect_err("err");
        assert_eq!(err.code, ContentErrorCode::XmlMalformed);
        assert!(err.location.is_some());
    }

    #[test]
    fn invalid_values_error() {
        let err = parse(
            r#"<Defs><ObjectDef><defName>a</defName><label>A</label><renderable>Sprite:</renderable></ObjectDef></Defs>"#,
        )
        .expect_err("sprite");
        assert_eq!(err.code, ContentErrorCode::InvalidValue);

        let err = parse(
            r#"<Defs><ObjectDef><defName>a</defName><label>A</label><renderable>Placeholder</renderable>
                <actions><ActionDef><name>w</name><durationMs>-5</durationMs></ActionDef></actions>
            </ObjectDef></Defs>"#,
        )
        .expect_err("duration");
        assert_eq!(err.code, ContentErrorCode::InvalidValue);
    }

    #[test]
    fn duplicate_action_and_field_error() {
        let err = parse(
            r#"<Defs><ObjectDef><defName>a</defName><label>A</label><renderable>Placeholder</renderable>
                <actions><ActionDef><name>w</name></ActionDef><ActionDef><name>w</name></ActionDef></actions>
            </ObjectDef></Defs>"#,
        )
        .expect_err("action");
        assert_eq!(err.code, ContentErrorCode::DuplicateAction);

        let err = parse(
            r#"<Defs><ObjectDef><defName>a</defName><defName>b</defName></ObjectDef></Defs>"#,
        )
        .expect_err("field");
        assert_eq!(err.code, ContentErrorCode::DuplicateField);
    }

    #[test]
    fn unknown_field_errors() {
        let err = parse(
            r#"<Defs><ObjectDef><defName>a</defName><label>A</label><renderable>Placeholder</renderable><mood>Happy</mood></ObjectDef></Defs>"#,
        )
        .expect_err("err");
        assert_eq!(err.code, ContentErrorCode::UnknownField);
    }

    #[test]
    fn directory_load_assigns_ids_by_def_name() {
        let temp = TempDir::new().expect("temp");
        write_file(
            &temp.path().join("b").join("zeta.xml"),
            r#"<Defs><ObjectDef><defName>zeta</defName><label>Zeta</label><renderable>Placeholder</renderable></ObjectDef></Defs>"#,
        );
        write_file(
            &temp.path().join("a.xml"),
            r#"<Defs><ObjectDef><defName>alpha</defName><label>Alpha</label><renderable>Placeholder</renderable></ObjectDef></Defs>"#,
        );
        write_file(&temp.path().join("readme.txt"), "not xml");

        let registry = load_object_registry(temp.path()).expect("load");
        assert_eq!(registry.len(), 2);
        let alpha = registry.object_id_by_name("alpha").expect("alpha");
        let zeta = registry.object_id_by_name("zeta").expect("zeta");
        assert!(alpha.0 < zeta.0);
    }

    #[test]
    fn duplicate_def_across_files_errors() {
        let temp = TempDir::new().expect("temp");
        let def = r#"<Defs><ObjectDef><defName>a</defName><label>A</label><renderable>Placeholder</renderable></ObjectDef></Defs>"#;
        write_file(&temp.path().join("one.xml"), def);
        write_file(&temp.path().join("two.xml"), def);

        let err = load_object_registry(temp.path()).expect_err("err");
        assert_eq!(err.code, ContentErrorCode::DuplicateDef);
        assert!(err.file_path.ends_with("two.xml"));
    }

    #[test]
    fn missing_directory_is_a_read_error() {
        let temp = TempDir::new().expect("temp");
        let err = load_object_registry(&temp.path().join("absent")).expect_err("err");
        assert_eq!(err.code, ContentErrorCode::ReadFile);
        assert_eq!(err.location, None);
    }
}
