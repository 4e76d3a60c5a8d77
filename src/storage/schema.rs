//! Database schema definitions

/// SQL to create the string table
///
/// `osz` is the UTF-16 offset of the sub-string inside `sz` (0 = none).
pub const CREATE_STR_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS str (
    id INTEGER PRIMARY KEY,
    osz INTEGER NOT NULL,
    csz INTEGER NOT NULL,
    cbu INTEGER NOT NULL,
    cbj INTEGER NOT NULL,
    sz TEXT NOT NULL
)
"#;

/// SQL to create the ingest staging table
pub const CREATE_TIMELINE_RAW_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS timeline_raw (
    tp INTEGER NOT NULL,
    ft INTEGER NOT NULL,
    ac INTEGER NOT NULL,
    pid INTEGER NOT NULL,
    data64 INTEGER NOT NULL,
    id_str INTEGER NOT NULL
)
"#;

/// SQL to create the timeline table
///
/// `oln_u`/`oln_j` are line offsets in the aggregate export files,
/// `oln_utp`/`oln_jtp` in the per-type export files.
pub const CREATE_TIMELINE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS timeline (
    id INTEGER PRIMARY KEY,
    tp INTEGER NOT NULL,
    ft INTEGER NOT NULL,
    ac INTEGER NOT NULL,
    pid INTEGER NOT NULL,
    data64 INTEGER NOT NULL,
    id_str INTEGER NOT NULL,
    oln_u INTEGER NOT NULL,
    oln_j INTEGER NOT NULL,
    oln_utp INTEGER NOT NULL,
    oln_jtp INTEGER NOT NULL
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_timeline_tp_id ON timeline(tp, id)",
    "CREATE INDEX IF NOT EXISTS idx_timeline_tp_oln_utp ON timeline(tp, oln_utp)",
    "CREATE INDEX IF NOT EXISTS idx_timeline_tp_oln_jtp ON timeline(tp, oln_jtp)",
    "CREATE INDEX IF NOT EXISTS idx_timeline_oln_u ON timeline(oln_u)",
    "CREATE INDEX IF NOT EXISTS idx_timeline_oln_j ON timeline(oln_j)",
];

/// Pragmas applied to every pooled connection of a file-backed store
pub const FILE_PRAGMAS: &str = "PRAGMA journal_mode = WAL; PRAGMA synchronous = OFF;";

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_STR_TABLE,
        CREATE_TIMELINE_RAW_TABLE,
        CREATE_TIMELINE_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
