use std::collections::BTreeMap;

use crate::domain::decision::{DecisionMatrixEntry, KnowledgeBase};
use crate::domain::intent::IntentLabel;
use crate::errors::DecisionMatrixError;
use crate::table::DelimitedTable;

pub const INTENT_COLUMN: &str = "intent";
pub const KNOWLEDGE_BASE_COLUMN: &str = "knowledge_base";
pub const ENTITY_EXTRACTION_COLUMN: &str = "entity_extraction";

/// Rows shipped with a fresh prompt book. `feedback` has no route on purpose:
/// an operator has to decide how feedback is handled before it is served.
pub const DEFAULT_DECISION_MATRIX: &str = "intent|knowledge_base|entity_extraction|action\n\
inventory|graph|true|query_inventory\n\
checkout|graph|false|process_checkout\n\
irrelevant|null|false|decline\n\
conversational|null|false|small_talk\n\
postSale|embedding|true|post_sale_support";

/// Static routing table from intent to knowledge source.
///
/// Extra columns are kept so the full table can be shown to the reasoning
/// prompt, but only the three routing columns drive [`DecisionMatrix::resolve`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionMatrix {
    table: DelimitedTable,
    entries: BTreeMap<IntentLabel, DecisionMatrixEntry>,
}

impl DecisionMatrix {
    pub fn parse(text: &str) -> Result<Self, DecisionMatrixError> {
        Self::from_table(DelimitedTable::decode(text)?)
    }

    pub fn from_table(table: DelimitedTable) -> Result<Self, DecisionMatrixError> {
        let intent_column = required_column(&table, INTENT_COLUMN)?;
        let knowledge_column = required_column(&table, KNOWLEDGE_BASE_COLUMN)?;
        let extraction_column = required_column(&table, ENTITY_EXTRACTION_COLUMN)?;

        let mut entries = BTreeMap::new();
        for (index, row) in table.rows().iter().enumerate() {
            let line = index + 2;
            let invalid = |message: String| DecisionMatrixError::InvalidRow { line, message };

            let intent = row[intent_column].parse::<IntentLabel>().map_err(invalid)?;
            let knowledge_base =
                row[knowledge_column].parse::<KnowledgeBase>().map_err(invalid)?;
            let requires_entity_extraction = parse_flag(&row[extraction_column]).map_err(invalid)?;

            let entry = DecisionMatrixEntry { intent, knowledge_base, requires_entity_extraction };
            if entries.insert(intent, entry).is_some() {
                return Err(DecisionMatrixError::InvalidRow {
                    line,
                    message: format!("intent `{intent}` appears more than once"),
                });
            }
        }

        Ok(Self { table, entries })
    }

    pub fn resolve(&self, intent: IntentLabel) -> Result<DecisionMatrixEntry, DecisionMatrixError> {
        self.entries.get(&intent).copied().ok_or(DecisionMatrixError::Incomplete { intent })
    }

    pub fn entries(&self) -> impl Iterator<Item = &DecisionMatrixEntry> {
        self.entries.values()
    }

    /// Every intent label without a row, in declaration order.
    pub fn missing_intents(&self) -> Vec<IntentLabel> {
        IntentLabel::ALL.into_iter().filter(|intent| !self.entries.contains_key(intent)).collect()
    }

    pub fn ensure_complete(&self) -> Result<(), DecisionMatrixError> {
        match self.missing_intents().first() {
            Some(intent) => Err(DecisionMatrixError::Incomplete { intent: *intent }),
            None => Ok(()),
        }
    }

    pub fn table(&self) -> &DelimitedTable {
        &self.table
    }

    pub fn to_text(&self) -> Result<String, DecisionMatrixError> {
        Ok(self.table.encode()?)
    }
}

fn required_column(table: &DelimitedTable, name: &str) -> Result<usize, DecisionMatrixError> {
    table.column_index(name).ok_or_else(|| DecisionMatrixError::MissingColumn(name.to_string()))
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" | "" => Ok(false),
        other => Err(format!("`{other}` is not a boolean")),
    }
}
