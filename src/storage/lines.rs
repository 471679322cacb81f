//! CrossLine / BaseLine / VerticalLineEquation storage: operator-defined
//! geometry, reconciled against the camera and bulk-cleared on teardown.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{map_sqlite_err, Store};
use crate::error::{NvrError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CrossLineMode {
    Right,
    Left,
    BothDirections,
}

impl CrossLineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrossLineMode::Right => "Right",
            CrossLineMode::Left => "Left",
            CrossLineMode::BothDirections => "BothDirections",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "Left" => CrossLineMode::Left,
            "BothDirections" => CrossLineMode::BothDirections,
            _ => CrossLineMode::Right,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrossLine {
    pub index: i64,
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
    pub name: String,
    pub mode: CrossLineMode,
}

#[derive(Debug, Clone)]
pub struct BaseLine {
    pub index: i64,
    pub matrix_num1: i64,
    pub matrix_num2: i64,
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

#[derive(Debug, Clone)]
pub struct VerticalLineEquation {
    pub index: i64,
    pub a: f64,
    pub b: f64,
}

impl Store {
    pub fn insert_line(&self, line: &CrossLine) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO lines (indexNum, x1, y1, x2, y2, name, mode) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![line.index, line.x1, line.y1, line.x2, line.y2, line.name, line.mode.as_str()],
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }

    /// All stored lines, ordered by name.
    pub fn select_all_lines(&self) -> Result<Vec<CrossLine>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT indexNum, x1, y1, x2, y2, name, mode FROM lines ORDER BY name ASC")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CrossLine {
                    index: row.get(0)?,
                    x1: row.get(1)?,
                    y1: row.get(2)?,
                    x2: row.get(3)?,
                    y2: row.get(4)?,
                    name: row.get(5)?,
                    mode: CrossLineMode::from_str(&row.get::<_, String>(6)?),
                })
            })
            .map_err(map_sqlite_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sqlite_err)
    }

    pub fn delete_line(&self, index: i64) -> Result<()> {
        let conn = self.conn.lock();
        let affected = conn
            .execute("DELETE FROM lines WHERE indexNum = ?1", params![index])
            .map_err(map_sqlite_err)?;
        if affected == 0 {
            return Err(NvrError::NotFound(format!("line index {index}")));
        }
        Ok(())
    }

    pub fn delete_all_lines(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM lines", []).map_err(map_sqlite_err)?;
        Ok(())
    }

    /// Replace the entire line set with `keep`, used by the request-3
    /// reconciliation handler.
    pub fn replace_all_lines(&self, keep: &[CrossLine]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM lines", []).map_err(map_sqlite_err)?;
        for line in keep {
            conn.execute(
                "INSERT INTO lines (indexNum, x1, y1, x2, y2, name, mode) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![line.index, line.x1, line.y1, line.x2, line.y2, line.name, line.mode.as_str()],
            )
            .map_err(map_sqlite_err)?;
        }
        Ok(())
    }

    pub fn insert_baseline(&self, baseline: &BaseLine) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO baseLines (indexNum, matrixNum1, x1, y1, matrixNum2, x2, y2) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                baseline.index,
                baseline.matrix_num1,
                baseline.x1,
                baseline.y1,
                baseline.matrix_num2,
                baseline.x2,
                baseline.y2,
            ],
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }

    pub fn baseline_exists(&self, index: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM baseLines WHERE indexNum = ?1",
                params![index],
                |row| row.get(0),
            )
            .map_err(map_sqlite_err)?;
        Ok(count > 0)
    }

    pub fn update_baseline_matrix_nums(&self, index: i64, m1: i64, m2: i64) -> Result<()> {
        let conn = self.conn.lock();
        let affected = conn
            .execute(
                "UPDATE baseLines SET matrixNum1 = ?1, matrixNum2 = ?2 WHERE indexNum = ?3",
                params![m1, m2, index],
            )
            .map_err(map_sqlite_err)?;
        if affected == 0 {
            return Err(NvrError::NotFound(format!("baseline index {index}")));
        }
        Ok(())
    }

    pub fn select_all_baselines(&self) -> Result<Vec<BaseLine>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT indexNum, matrixNum1, x1, y1, matrixNum2, x2, y2 FROM baseLines")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(BaseLine {
                    index: row.get(0)?,
                    matrix_num1: row.get(1)?,
                    x1: row.get(2)?,
                    y1: row.get(3)?,
                    matrix_num2: row.get(4)?,
                    x2: row.get(5)?,
                    y2: row.get(6)?,
                })
            })
            .map_err(map_sqlite_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sqlite_err)
    }

    pub fn delete_all_baselines(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM baseLines", []).map_err(map_sqlite_err)?;
        Ok(())
    }

    pub fn insert_vertical_equation(&self, eq: &VerticalLineEquation) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO verticalLineEquations (indexNum, a, b) VALUES (?1, ?2, ?3)",
            params![eq.index, eq.a, eq.b],
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }

    pub fn select_vertical_equation(&self, index: i64) -> Result<VerticalLineEquation> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT indexNum, a, b FROM verticalLineEquations WHERE indexNum = ?1",
            params![index],
            |row| {
                Ok(VerticalLineEquation {
                    index: row.get(0)?,
                    a: row.get(1)?,
                    b: row.get(2)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                NvrError::NotFound(format!("vertical line equation index {index}"))
            }
            other => map_sqlite_err(other),
        })
    }

    pub fn delete_all_vertical_equations(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM verticalLineEquations", [])
            .map_err(map_sqlite_err)?;
        Ok(())
    }
}
