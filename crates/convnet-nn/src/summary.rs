use std::fmt;

use convnet_core::Shape;

use crate::layers::ParamCount;
use crate::spec::LayerKind;

/// One line of a model summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub name: String,
    pub kind: LayerKind,
    /// Per-sample output shape.
    pub output_shape: Shape,
    pub params: ParamCount,
}

/// Layer-by-layer output shapes and parameter counts of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub input_shape: Shape,
    pub rows: Vec<SummaryRow>,
}

impl ModelSummary {
    pub fn params(&self) -> ParamCount {
        self.rows.iter().fold(ParamCount::default(), |acc, row| ParamCount {
            trainable: acc.trainable + row.params.trainable,
            non_trainable: acc.non_trainable + row.params.non_trainable,
        })
    }

    pub fn output_shape(&self) -> &Shape {
        self.rows.last().map_or(&self.input_shape, |row| &row.output_shape)
    }
}

/// `(None, d0, d1, ..)` with the batch axis left open.
fn batched(shape: &Shape) -> String {
    let mut out = String::from("(None");
    for d in shape.dims() {
        out.push_str(&format!(", {d}"));
    }
    out.push(')');
    out
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule_len = 84;
        writeln!(f, "Input shape: {}", batched(&self.input_shape))?;
        writeln!(f, "{}", "_".repeat(rule_len))?;
        writeln!(f, "{:<44} {:<26} {:>12}", "Layer (type)", "Output Shape", "Param #")?;
        writeln!(f, "{}", "=".repeat(rule_len))?;
        for row in &self.rows {
            let label = format!("{} ({})", row.name, row.kind);
            writeln!(f, "{:<44} {:<26} {:>12}", label, batched(&row.output_shape), row.params.total())?;
        }
        writeln!(f, "{}", "=".repeat(rule_len))?;
        let params = self.params();
        writeln!(f, "Total params: {}", params.total())?;
        writeln!(f, "Trainable params: {}", params.trainable)?;
        write!(f, "Non-trainable params: {}", params.non_trainable)
    }
}
