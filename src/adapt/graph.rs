use std::fs::File;
use std::io::{BufWriter, Write};

/// A sequence of `(x, y)` rows such as DOFs vs. error estimate, saved as a two-column `.dat` file
///
/// Rows are kept in the order they were added (one per adaptivity step).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConvergenceGraph {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    rows: Vec<(f64, f64)>,
}

impl ConvergenceGraph {
    pub fn new(title: impl Into<String>, x_label: impl Into<String>, y_label: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            x_label: x_label.into(),
            y_label: y_label.into(),
            rows: Vec::new(),
        }
    }

    pub fn add_value(&mut self, x: f64, y: f64) {
        self.rows.push((x, y));
    }

    pub fn rows(&self) -> &[(f64, f64)] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the graph to `path`: a commented header followed by one `x y` row per line
    pub fn save(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let output_file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(&output_file);
        self.write_to(&mut writer)?;
        writer.flush()
    }

    fn write_to(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writeln!(writer, "# {}", self.title)?;
        writeln!(writer, "# {} {}", self.x_label, self.y_label)?;
        for (x, y) in self.rows.iter() {
            writeln!(writer, "{} {:.10e}", x, y)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dat_format() {
        let mut graph = ConvergenceGraph::new("Error convergence", "Degrees of Freedom", "Error [%]");
        assert!(graph.is_empty());
        graph.add_value(5.0, 12.5);
        graph.add_value(9.0, 0.25);

        let mut buffer = Vec::new();
        graph.write_to(&mut buffer).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "# Error convergence\n# Degrees of Freedom Error [%]\n5 1.2500000000e1\n9 2.5000000000e-1\n"
        );
    }

    #[test]
    fn save_and_overwrite() {
        let path = std::env::temp_dir().join(format!("hp_adapt_graph_{}.dat", std::process::id()));
        let path = path.to_string_lossy().to_string();

        let mut graph = ConvergenceGraph::new("cpu", "CPU time [s]", "Error [%]");
        graph.add_value(0.5, 1.0);
        graph.save(&path).unwrap();
        graph.add_value(1.5, 0.1);
        graph.save(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 4);
        assert!(contents.ends_with("1.5 1.0000000000e-1\n"));
        std::fs::remove_file(&path).unwrap();
    }
}
