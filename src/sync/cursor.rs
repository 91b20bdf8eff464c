// ABOUTME: Watermark cursor reader - max value of the watermark column on one side
// ABOUTME: Undefined (None) when the table is empty

use crate::error::{SyncError, SyncResult};
use crate::handle::TableHandle;
use crate::table::Table;
use crate::value::Value;

/// Read the maximum value of `column` on `table`.
///
/// Returns `Ok(None)` when the table has no rows (or only NULL watermarks).
/// Fails with [`SyncError::ColumnNotFound`] when the column is not part of the
/// table schema. Issues read-only queries only.
pub async fn max_watermark<H>(table: &Table<'_, H>, column: &str) -> SyncResult<Option<Value>>
where
    H: TableHandle + ?Sized,
{
    if !table.has_column(column).await? {
        return Err(SyncError::ColumnNotFound {
            table: table.to_string(),
            column: column.to_string(),
        });
    }

    let cursor = table.max_value(column).await?;
    tracing::debug!(
        "Max {} on {}: {}",
        column,
        table,
        crate::value::display_cursor(cursor.as_ref())
    );
    Ok(cursor)
}
