//! ASCII VTK XML (`.vtu`) writer for one-dimensional line grids.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::dispatch_error::DispatchError;

/// VTK cell type id of a two-node line.
const VTK_LINE: u8 = 3;

/// Writes a chain of line cells through `points` with one scalar per point.
#[derive(Debug, Clone)]
pub struct VtuWriter {
    field_name: String,
}

impl VtuWriter {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
        }
    }

    fn write_data_array<W: Write, T: ToString>(
        writer: &mut W,
        data_type: &str,
        name: &str,
        num_components: usize,
        values: impl IntoIterator<Item = T>,
    ) -> Result<(), DispatchError> {
        writeln!(
            writer,
            "        <DataArray type=\"{data_type}\" Name=\"{name}\" NumberOfComponents=\"{num_components}\" format=\"ascii\">"
        )?;
        let mut line_len = 0usize;
        write!(writer, "         ")?;
        for value in values {
            let value = value.to_string();
            if line_len + value.len() + 1 > 70 {
                writeln!(writer)?;
                write!(writer, "         ")?;
                line_len = 0;
            }
            write!(writer, " {value}")?;
            line_len += value.len() + 1;
        }
        writeln!(writer)?;
        writeln!(writer, "        </DataArray>")?;
        Ok(())
    }

    pub fn write<W: Write>(
        &self,
        mut writer: W,
        points: &[f64],
        values: &[f64],
    ) -> Result<(), DispatchError> {
        if points.len() != values.len() {
            return Err(DispatchError::InvalidArgument(format!(
                "{} points but {} values",
                points.len(),
                values.len()
            )));
        }
        let n_points = points.len();
        let n_cells = n_points.saturating_sub(1);

        writeln!(writer, "<?xml version=\"1.0\"?>")?;
        writeln!(
            writer,
            "<VTKFile type=\"UnstructuredGrid\" version=\"0.1\" byte_order=\"LittleEndian\">"
        )?;
        writeln!(writer, "  <UnstructuredGrid>")?;
        writeln!(
            writer,
            "    <Piece NumberOfPoints=\"{n_points}\" NumberOfCells=\"{n_cells}\">"
        )?;

        writeln!(writer, "      <PointData Scalars=\"{}\">", self.field_name)?;
        Self::write_data_array(&mut writer, "Float64", &self.field_name, 1, values)?;
        writeln!(writer, "      </PointData>")?;

        writeln!(writer, "      <Points>")?;
        Self::write_data_array(
            &mut writer,
            "Float64",
            "Coordinates",
            3,
            points.iter().flat_map(|&x| [x, 0.0, 0.0]),
        )?;
        writeln!(writer, "      </Points>")?;

        writeln!(writer, "      <Cells>")?;
        Self::write_data_array(
            &mut writer,
            "Int64",
            "connectivity",
            1,
            (0..n_cells).flat_map(|c| [c, c + 1]),
        )?;
        Self::write_data_array(
            &mut writer,
            "Int64",
            "offsets",
            1,
            (1..=n_cells).map(|c| 2 * c),
        )?;
        Self::write_data_array(
            &mut writer,
            "UInt8",
            "types",
            1,
            std::iter::repeat_n(VTK_LINE, n_cells),
        )?;
        writeln!(writer, "      </Cells>")?;

        writeln!(writer, "    </Piece>")?;
        writeln!(writer, "  </UnstructuredGrid>")?;
        writeln!(writer, "</VTKFile>")?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_file(
        &self,
        path: &Path,
        points: &[f64],
        values: &[f64],
    ) -> Result<(), DispatchError> {
        let file = File::create(path)?;
        self.write(BufWriter::new(file), points, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_line_cells_and_point_data() {
        let mut out = Vec::new();
        VtuWriter::new("CG_solution")
            .write(&mut out, &[0.0, 0.5, 1.0], &[0.0, 0.125, 0.0])
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("NumberOfPoints=\"3\" NumberOfCells=\"2\""));
        assert!(text.contains("Name=\"CG_solution\""));
        assert!(text.contains(" 0 1 1 2"));
        assert!(text.contains(" 2 4"));
        assert!(text.contains(" 0.125"));
        assert!(text.trim_end().ends_with("</VTKFile>"));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = VtuWriter::new("u").write(Vec::<u8>::new(), &[0.0, 1.0], &[0.0]);
        assert!(matches!(err, Err(DispatchError::InvalidArgument(_))));
    }
}
