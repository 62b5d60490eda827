use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::control::ControlTables;
use crate::error::{Error, RatchetResult};
use crate::source::{
    Command, DelimiterChange, Delimiters, Location, Resource, ResourceLoader,
    parser::DIRECTIVE_PREFIX,
};
use crate::upgrade::{PatchSegment, SegmentKind};

static SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^(SETUP|UPGRADE|SWITCH|DOWNGRADE)(\s+OPEN)?\s+"([^"]*)"\s*-->\s*"([^"]*)"\s*$"#,
    )
    .expect("static regex")
});
static SEGMENT_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:SETUP|UPGRADE|SWITCH|DOWNGRADE)\b").expect("static regex")
});
static END_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:END\s+|/)(SETUP|UPGRADE|SWITCH|DOWNGRADE)\s*$").expect("static regex")
});
static DEFINITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^DEFINITION\s*$").expect("static regex"));
static END_DEFINITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:END\s+|/)DEFINITION\s*$").expect("static regex"));
static TABLES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^VERSION\s+TABLE\s+(\w+)\s+LOG\s+TABLE\s+(\w+)\s*$").expect("static regex")
});

/// The patch graph read from one upgrade file.
///
/// Versions are the nodes and [`PatchSegment`]s the edges. Segments keep
/// their declaration order, which is the tie-breaker for path resolution.
#[derive(Debug, Default)]
pub struct UpgradeFile {
    name: Option<Arc<str>>,
    segments: Vec<PatchSegment>,
    delimiters: Delimiters,
    tables: ControlTables,
}

enum Scan {
    Outside,
    Definition,
    Segment { header: PatchSegment, start: usize },
}

impl UpgradeFile {
    /// An empty graph, for building segments by hand.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the upgrade file `name` with `loader`.
    pub fn open(loader: &dyn ResourceLoader, name: &str) -> RatchetResult<Self> {
        let resource = loader.load(name, None)?;
        Self::from_resource(&resource)
    }

    pub fn from_resource(resource: &Resource) -> RatchetResult<Self> {
        Self::parse(Some(resource.name().clone()), resource.text())
    }

    /// Scan the text of an upgrade file for its definition block and segments.
    pub fn parse(name: Option<Arc<str>>, text: &str) -> RatchetResult<Self> {
        let lines: Vec<&str> = text.lines().collect();
        let location = |line: usize| Location::new(name.clone(), line);

        let mut file = Self {
            name: name.clone(),
            ..Self::default()
        };
        let mut declared: Option<Vec<PatchSegment>> = None;
        let mut found: Vec<PatchSegment> = Vec::new();
        let mut scan = Scan::Outside;

        for (i, line) in lines.iter().enumerate() {
            let here = location(i + 1);
            let directive = line.trim().strip_prefix(DIRECTIVE_PREFIX).map(str::trim);

            if let Scan::Definition = scan {
                let Some(d) = directive else {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Err(Error::source_error(
                        "only directives are allowed in the definition block",
                        &here,
                    ));
                };
                if d.is_empty() || d.starts_with("//") {
                    continue;
                }
                if END_DEFINITION.is_match(d) {
                    scan = Scan::Outside;
                } else if let Some(segment) = parse_header(d, &here)? {
                    declared.get_or_insert_with(Vec::new).push(segment);
                } else if let Some(c) = TABLES.captures(d) {
                    file.tables = ControlTables::new(&c[1], &c[2]);
                } else if let Some(change) = DelimiterChange::parse(d, &here)? {
                    if let DelimiterChange::Set(delimiters) = change {
                        file.delimiters = delimiters;
                    }
                } else {
                    return Err(Error::source_error(
                        format!("unexpected `{d}` in the definition block"),
                        &here,
                    ));
                }
                continue;
            }

            let Some(d) = directive else {
                continue;
            };

            if DEFINITION.is_match(d) {
                if declared.is_some() || !found.is_empty() || !matches!(scan, Scan::Outside) {
                    return Err(Error::source_error(
                        "the definition block must come before all segments",
                        &here,
                    ));
                }
                declared = Some(Vec::new());
                scan = Scan::Definition;
                continue;
            }

            if let Some(header) = parse_header(d, &here)? {
                if let Scan::Segment { header, start } = std::mem::replace(&mut scan, Scan::Outside)
                {
                    found.push(close(header, &lines, start, i));
                }
                scan = Scan::Segment {
                    header,
                    start: i + 1,
                };
                continue;
            }

            if let Some(c) = END_SEGMENT.captures(d) {
                match std::mem::replace(&mut scan, Scan::Outside) {
                    Scan::Segment { header, start }
                        if header.kind().keyword().eq_ignore_ascii_case(&c[1]) =>
                    {
                        found.push(close(header, &lines, start, i));
                    }
                    _ => {
                        return Err(Error::source_error(
                            format!("`{d}` does not close an open {} segment", &c[1]),
                            &here,
                        ));
                    }
                }
            }
        }

        match scan {
            Scan::Definition => {
                return Err(Error::source_error(
                    "definition block is not closed",
                    &location(lines.len()),
                ));
            }
            Scan::Segment { header, start } => found.push(close(header, &lines, start, lines.len())),
            Scan::Outside => {}
        }

        let segments = match declared {
            Some(declared) => reconcile(declared, found)?,
            None => found,
        };
        for segment in segments {
            file.add_segment(segment)?;
        }

        log::debug!(
            target: "ratchet",
            "read upgrade file {} with {} segments",
            name.as_deref().unwrap_or("<unnamed>"),
            file.segments.len()
        );
        Ok(file)
    }

    /// Use `delimiters` as the default delimiters of every segment.
    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    /// Use other control table names.
    pub fn with_control_tables(mut self, tables: ControlTables) -> Self {
        self.tables = tables;
        self
    }

    /// Add a segment; a second segment with the same kind and endpoints is an
    /// error.
    pub fn add_segment(&mut self, segment: PatchSegment) -> RatchetResult<()> {
        if let Some(existing) = self.segments.iter().find(|s| s.same_edge(&segment)) {
            return Err(Error::source_error(
                format!("duplicate segment {segment}, first declared at {}", existing.location()),
                segment.location(),
            ));
        }
        self.segments.push(segment);
        Ok(())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    pub fn control_tables(&self) -> &ControlTables {
        &self.tables
    }

    /// All segments in declaration order.
    pub fn segments(&self) -> &[PatchSegment] {
        &self.segments
    }

    /// Segments leaving `version`, in declaration order.
    pub fn segments_from<'a, 'v>(
        &'a self,
        version: Option<&'v str>,
    ) -> impl Iterator<Item = &'a PatchSegment> + use<'a, 'v> {
        self.segments.iter().filter(move |s| s.source() == version)
    }

    /// Segments arriving at `version`, in declaration order.
    pub fn segments_to<'a, 'v>(
        &'a self,
        version: &'v str,
    ) -> impl Iterator<Item = &'a PatchSegment> + use<'a, 'v> {
        self.segments.iter().filter(move |s| s.target() == version)
    }

    /// The first declared segment from `source` to `target`.
    pub fn segment(&self, source: Option<&str>, target: &str) -> Option<&PatchSegment> {
        self.segments_from(source).find(|s| s.target() == target)
    }

    /// Every version named by a segment, in order of first appearance.
    pub fn versions(&self) -> Vec<&str> {
        let mut versions: Vec<&str> = Vec::new();
        for segment in &self.segments {
            for version in segment.source().into_iter().chain([segment.target()]) {
                if !versions.contains(&version) {
                    versions.push(version);
                }
            }
        }
        versions
    }

    pub fn contains_version(&self, version: &str) -> bool {
        self.segments
            .iter()
            .any(|s| s.target() == version || s.source() == Some(version))
    }

    /// The commands of `segment` parsed with this file's default delimiters.
    pub fn commands<'a>(&self, segment: &'a PatchSegment) -> RatchetResult<&'a [Command]> {
        segment.commands(&self.delimiters)
    }
}

fn parse_header(text: &str, location: &Location) -> RatchetResult<Option<PatchSegment>> {
    let Some(c) = SEGMENT.captures(text) else {
        if SEGMENT_WORD.is_match(text) && !END_SEGMENT.is_match(text) {
            return Err(Error::source_error(
                format!("malformed segment declaration `{text}`"),
                location,
            ));
        }
        return Ok(None);
    };
    let kind: SegmentKind = c[1]
        .parse()
        .map_err(|message: String| Error::source_error(message, location))?;
    let source = Some(c[3].to_string()).filter(|s| !s.is_empty());
    let target = c[4].to_string();
    if target.is_empty() {
        return Err(Error::source_error("segment target must not be empty", location));
    }
    if kind == SegmentKind::Setup && source.is_some() {
        return Err(Error::source_error(
            "a SETUP segment starts from no version",
            location,
        ));
    }
    Ok(Some(
        PatchSegment::new(kind, source, target)
            .open(c.get(2).is_some())
            .at(location.clone()),
    ))
}

fn close(header: PatchSegment, lines: &[&str], start: usize, end: usize) -> PatchSegment {
    let body = lines[start.min(end)..end].join("\n");
    header.with_body(body, start + 1)
}

// Every segment in the body must be declared and every declared segment
// must be present. The declaration order wins.
fn reconcile(
    declared: Vec<PatchSegment>,
    mut found: Vec<PatchSegment>,
) -> RatchetResult<Vec<PatchSegment>> {
    let mut segments = Vec::with_capacity(declared.len());
    for declaration in declared {
        let Some(i) = found.iter().position(|s| s.same_edge(&declaration)) else {
            return Err(Error::source_error(
                format!("declared segment {declaration} not found in the file"),
                declaration.location(),
            ));
        };
        let segment = found.remove(i);
        let open = segment.is_open() || declaration.is_open();
        segments.push(segment.open(open));
    }
    if let Some(extra) = found.first() {
        return Err(Error::source_error(
            format!("segment {extra} is not declared in the definition block"),
            extra.location(),
        ));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Delimiter;

    const FILE: &str = r#"--* // Demo upgrade file
--* DEFINITION
--*   SETUP "" --> "1.0"
--*   UPGRADE OPEN "1.0" --> "1.1"
--*   VERSION TABLE app_version LOG TABLE app_version_log
--*   DELIMITER IS ;
--* END DEFINITION

--* SETUP "" --> "1.0"
CREATE TABLE a (id int);
--* END SETUP

--* UPGRADE "1.0" --> "1.1"
ALTER TABLE a ADD name text;
--* /UPGRADE
"#;

    #[test]
    fn reads_definition_and_segments() {
        let file = UpgradeFile::parse(Some(Arc::from("demo.sql")), FILE).unwrap();
        assert_eq!(file.segments().len(), 2);
        assert_eq!(file.control_tables().version_table(), "app_version");
        assert_eq!(file.control_tables().log_table(), "app_version_log");
        assert_eq!(file.delimiters().primary(), &Delimiter::trailing(";"));

        let setup = file.segment(None, "1.0").unwrap();
        assert_eq!(setup.kind(), SegmentKind::Setup);
        let commands = file.commands(setup).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].text(), "CREATE TABLE a (id int)");
        assert_eq!(commands[0].location().line(), 10);

        let upgrade = file.segment(Some("1.0"), "1.1").unwrap();
        assert!(upgrade.is_open());
        assert_eq!(file.versions(), vec!["1.0", "1.1"]);
    }

    #[test]
    fn lookups_outlive_the_version_they_were_given() {
        let file = UpgradeFile::parse(None, FILE).unwrap();
        let upgrade = {
            let version = String::from("1.0");
            file.segment(Some(&version), "1.1").unwrap()
        };
        assert_eq!(upgrade.target(), "1.1");

        let arriving: Vec<&PatchSegment> = {
            let version = String::from("1.1");
            file.segments_to(&version).collect()
        };
        assert_eq!(arriving.len(), 1);
    }

    #[test]
    fn segments_without_definition_end_at_next_boundary() {
        let text = "--* SETUP \"\" --> \"1\"\nSELECT 1\nGO\n--* UPGRADE \"1\" --> \"2\"\nSELECT 2\nGO\n";
        let file = UpgradeFile::parse(None, text).unwrap();
        let setup = file.segment(None, "1").unwrap();
        assert_eq!(file.commands(setup).unwrap().len(), 1);
        let upgrade = file.segment(Some("1"), "2").unwrap();
        assert_eq!(file.commands(upgrade).unwrap()[0].location().line(), 5);
    }

    #[test]
    fn duplicate_segment_is_fatal() {
        let text = "--* UPGRADE \"1\" --> \"2\"\n--* UPGRADE \"1\" --> \"2\"\n";
        assert!(matches!(
            UpgradeFile::parse(None, text),
            Err(Error::Source { ref message, .. }) if message.starts_with("duplicate segment")
        ));
    }

    #[test]
    fn same_endpoints_with_other_kind_is_allowed() {
        let text = "--* UPGRADE \"1\" --> \"2\"\n--* SWITCH \"1\" --> \"2\"\n";
        assert_eq!(UpgradeFile::parse(None, text).unwrap().segments().len(), 2);
    }

    #[test]
    fn undeclared_segment_is_fatal() {
        let text = "--* DEFINITION\n--* SETUP \"\" --> \"1\"\n--* END DEFINITION\n\
                    --* SETUP \"\" --> \"1\"\n--* UPGRADE \"1\" --> \"2\"\n";
        assert!(matches!(
            UpgradeFile::parse(None, text),
            Err(Error::Source { ref message, .. }) if message.contains("not declared")
        ));
    }

    #[test]
    fn missing_declared_segment_is_fatal() {
        let text = "--* DEFINITION\n--* SETUP \"\" --> \"1\"\n--* UPGRADE \"1\" --> \"2\"\n\
                    --* END DEFINITION\n--* SETUP \"\" --> \"1\"\n";
        assert!(matches!(
            UpgradeFile::parse(None, text),
            Err(Error::Source { ref message, .. }) if message.contains("not found")
        ));
    }

    #[test]
    fn malformed_header_reports_line() {
        let text = "\n--* UPGRADE 1.0 --> 1.1\n";
        assert!(matches!(
            UpgradeFile::parse(None, text),
            Err(Error::Source { ref location, .. }) if location.line() == 2
        ));
    }

    #[test]
    fn unmatched_end_marker() {
        let text = "--* SETUP \"\" --> \"1\"\n--* END UPGRADE\n";
        assert!(UpgradeFile::parse(None, text).is_err());
    }
}
