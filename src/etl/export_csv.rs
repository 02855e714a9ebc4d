use std::{fs, io::Write, path::Path};

use csv::{Terminator, WriterBuilder};

use crate::data::graph::RoadGraph;
use crate::errors::Result;

use super::{build_graph, read_cache, Etl};

pub const ETL_NAME: &str = "export_csv";
pub const OUTPUT_FILE_NAME: &str = "Addjested_list.csv";

pub const HEADER: [&str; 2] = ["Nodes", "Addjested Nodes"];

/// `{a,b,c,}`: every neighbor is followed by a comma, the last one included.
fn neighbor_list(neighbors: &[i64]) -> String {
    let mut field = String::from("{");
    for neighbor in neighbors {
        field.push_str(&neighbor.to_string());
        field.push(',');
    }
    field.push('}');
    field
}

/// One `;` separated line per connected node, in ascending id order.
pub fn write_csv<W: Write>(graph: &RoadGraph, writer: W) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b';')
        .terminator(Terminator::Any(b'\n'))
        .from_writer(writer);

    writer.write_record(HEADER)?;
    for (id, neighbors) in &graph.adjacency {
        writer.write_record([id.to_string(), neighbor_list(neighbors)])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Default)]
pub struct ExportCsvEtl;

impl Etl for ExportCsvEtl {
    type Input = RoadGraph;
    type Output = Vec<u8>;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn output_file_name(&self) -> &str {
        OUTPUT_FILE_NAME
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        read_cache(&dir.join(build_graph::OUTPUT_FILE_NAME))
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let mut output = Vec::new();
        write_csv(&input, &mut output)?;
        Ok(output)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        fs::write(dir.join(OUTPUT_FILE_NAME), output)?;
        Ok(())
    }
}
