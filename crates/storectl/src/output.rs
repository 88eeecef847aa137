use serde::Serialize;
use std::io::{self, Write};

#[derive(clap::Args, Clone, Debug, Default)]
pub struct Output {
    /// Output format. Defaults to a table when stdout is a terminal, and to JSON otherwise.
    #[clap(global = true, short, long, value_enum)]
    pub output: Option<OutputType>,
}

#[derive(clap::ValueEnum, Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutputType {
    /// Newline-delimited JSON, one document per line.
    Json,
    /// A stream of YAML documents.
    Yaml,
    /// Tables meant for reading at a terminal.
    Table,
}

impl Output {
    pub fn resolve(&self) -> OutputType {
        use crossterm::tty::IsTty;

        match self.output {
            Some(ty) => ty,
            None if io::stdout().is_tty() => OutputType::Table,
            None => OutputType::Json,
        }
    }
}

/// CliOutput is an item which prints as its own JSON or YAML document,
/// or as one row of a table.
pub trait CliOutput: Serialize {
    fn table_headers() -> Vec<&'static str>;

    /// Cells of this item's row, in the order of `table_headers`.
    fn into_table_row(self) -> Vec<String>;
}

/// Print `items` to stdout in the format `ty`.
pub fn print_all<T: CliOutput>(
    ty: OutputType,
    items: impl IntoIterator<Item = T>,
) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();

    match ty {
        OutputType::Table => write_table(&mut stdout, items),
        OutputType::Json => items
            .into_iter()
            .try_for_each(|item| write_json(&mut stdout, &item)),
        OutputType::Yaml => items
            .into_iter()
            .try_for_each(|item| write_yaml(&mut stdout, &item)),
    }
}

pub fn write_json<W: Write, T: Serialize>(w: &mut W, document: &T) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *w, document)?;
    w.write_all(b"\n")?;
    Ok(())
}

pub fn write_yaml<W: Write, T: Serialize>(w: &mut W, document: &T) -> anyhow::Result<()> {
    serde_yaml::to_writer(&mut *w, document)?;
    w.write_all(b"\n")?;
    Ok(())
}

pub fn write_table<W: Write, T: CliOutput>(
    w: &mut W,
    items: impl IntoIterator<Item = T>,
) -> anyhow::Result<()> {
    let mut table = comfy_table::Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_header(T::table_headers());

    for item in items {
        table.add_row(item.into_table_row());
    }
    for line in table.lines() {
        writeln!(w, "{line}")?;
    }
    Ok(())
}
