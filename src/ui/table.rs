use crate::timeline::TimelineTypeInfo;
use crate::ui::human_bytes;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
pub struct TypeRow {
    #[tabled(rename = "Id")]
    pub id: u32,
    #[tabled(rename = "Type")]
    pub short_name: String,
    #[tabled(rename = "Text file")]
    pub utf8_file: String,
    #[tabled(rename = "Size")]
    pub utf8_size: String,
    #[tabled(rename = "JSON file")]
    pub json_file: String,
    #[tabled(rename = "Size")]
    pub json_size: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

/// Timeline types with the current size of their export files
pub fn types_table(types: &[TimelineTypeInfo]) -> String {
    let rows: Vec<TypeRow> = types
        .iter()
        .map(|t| TypeRow {
            id: t.id,
            short_name: t.short_name.clone(),
            utf8_file: t.utf8_file_name.clone(),
            utf8_size: human_bytes(t.utf8_size),
            json_file: t.json_file_name.clone(),
            json_size: human_bytes(t.json_size),
        })
        .collect();
    Table::new(&rows).with(Style::rounded()).to_string()
}
