use super::{RecordSink, RecordSource, SourceSpec};
use crate::error::{DataError, FatalError, FoodCalcError};
use crate::script::{Dialect, FileFormat};
use std::io::{BufRead, Write};

/// Read buffer for one logical line; longer lines are refilled.
const LINE_BUFFER: usize = 512;

/// Reads delimited text: an optional header line of field names, then one
/// record per line.
///
/// A line starting with `=` continues the previous line. Lines starting with
/// the comment character are skipped, and an unquoted comment character ends
/// a line. When the source has star fields, a line starting with `*` sets the
/// first values and they persist for the following lines.
pub struct DelimitedSource {
    name: String,
    lines: std::io::Lines<Box<dyn BufRead>>,
    pending: Option<(usize, String)>,
    physical: usize,
    line: usize,
    dialect: Dialect,
    fields: Vec<String>,
    star: usize,
    star_values: Vec<f64>,
    text: Vec<bool>,
    /// Configured once; every logical line is split with it into `record`.
    csv: csv::ReaderBuilder,
    record: csv::StringRecord,
}

impl DelimitedSource {
    pub fn new(
        name: &str,
        reader: Box<dyn BufRead>,
        spec: &SourceSpec,
    ) -> Result<Self, FoodCalcError> {
        let separator = if spec.dialect.separator.is_ascii() {
            spec.dialect.separator as u8
        } else {
            b','
        };
        let mut csv = csv::ReaderBuilder::new();
        csv.has_headers(false)
            .flexible(true)
            .delimiter(separator)
            .trim(csv::Trim::All)
            .buffer_capacity(LINE_BUFFER);
        let mut source = Self {
            name: name.to_string(),
            lines: reader.lines(),
            pending: None,
            physical: 0,
            line: 0,
            dialect: spec.dialect,
            fields: Vec::new(),
            star: 0,
            star_values: Vec::new(),
            text: Vec::new(),
            csv,
            record: csv::StringRecord::new(),
        };
        match (&spec.format, &spec.declared) {
            (FileFormat::Text, _) | (_, None) => source.read_header()?,
            (_, Some(declared)) => {
                source.fields = declared.fields.clone();
                source.star = declared.star;
            }
        }
        source.star_values = vec![0.0; source.star];
        source.text = vec![false; source.fields.len()];
        Ok(source)
    }

    fn read_header(&mut self) -> Result<(), FoodCalcError> {
        let Some((number, text)) = self.next_line()? else {
            return Ok(());
        };
        self.line = number;
        if let Some(star_part) = text.trim_start().strip_prefix('*') {
            self.split(star_part, number)?;
            self.fields = self.record.iter().map(str::to_lowercase).collect();
            self.star = self.fields.len();
            if let Some((number, text)) = self.next_line()? {
                self.line = number;
                self.split(&text, number)?;
                self.fields.extend(self.record.iter().map(str::to_lowercase));
            }
        } else {
            self.split(&text, number)?;
            self.fields = self.record.iter().map(str::to_lowercase).collect();
        }
        Ok(())
    }

    fn physical_line(&mut self) -> Result<Option<(usize, String)>, FoodCalcError> {
        if let Some(pending) = self.pending.take() {
            return Ok(Some(pending));
        }
        match self.lines.next() {
            None => Ok(None),
            Some(Ok(text)) => {
                self.physical += 1;
                Ok(Some((self.physical, text)))
            }
            Some(Err(e)) => Err(FatalError::Io {
                target: self.name.clone(),
                message: e.to_string(),
            }
            .into()),
        }
    }

    /// The next logical line with its continuation lines joined, skipping
    /// blank and comment lines.
    fn next_line(&mut self) -> Result<Option<(usize, String)>, FoodCalcError> {
        loop {
            let Some((number, text)) = self.physical_line()? else {
                return Ok(None);
            };
            let trimmed = text.trim_start();
            if trimmed.is_empty() || trimmed.starts_with(self.dialect.comment) {
                continue;
            }
            let mut joined = strip_comment(&text, self.dialect.comment).to_string();
            loop {
                match self.physical_line()? {
                    Some((_, next)) if next.trim_start().starts_with('=') => {
                        let continued = &next.trim_start()[1..];
                        joined.push_str(strip_comment(continued, self.dialect.comment));
                    }
                    Some(other) => {
                        self.pending = Some(other);
                        break;
                    }
                    None => break,
                }
            }
            return Ok(Some((number, joined)));
        }
    }

    /// Splits one logical line into `self.record`.
    fn split(&mut self, text: &str, line: usize) -> Result<(), FoodCalcError> {
        self.record.clear();
        if self.dialect.whitespace_separated() {
            let values = split_whitespace_quoted(text)
                .ok_or_else(|| self.malformed("Unterminated quote", line))?;
            for value in &values {
                self.record.push_field(value);
            }
            return Ok(());
        }
        let mut reader = self.csv.from_reader(text.as_bytes());
        if let Err(e) = reader.read_record(&mut self.record) {
            return Err(self.malformed(&e.to_string(), line));
        }
        Ok(())
    }

    fn malformed(&self, message: &str, line: usize) -> FoodCalcError {
        DataError::Malformed {
            message: message.to_string(),
            line,
            file: self.name.clone(),
        }
        .into()
    }

    /// Parses the split record into `out[columns]`.
    fn parse_values(
        &self,
        columns: std::ops::Range<usize>,
        out: &mut [f64],
        line: usize,
    ) -> Result<(), FoodCalcError> {
        if self.record.len() != columns.len() {
            return Err(self.malformed("Error in list of values", line));
        }
        for (value, column) in self.record.iter().zip(columns) {
            out[column] = if self.text.get(column).copied().unwrap_or(false) {
                0.0
            } else {
                parse_value(value, self.dialect.decimal_point)
                    .ok_or_else(|| self.malformed("Error in list of values", line))?
            };
        }
        Ok(())
    }
}

impl RecordSource for DelimitedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn star_fields(&self) -> usize {
        self.star
    }

    fn line(&self) -> usize {
        self.line
    }

    fn set_text_columns(&mut self, text: &[bool]) {
        self.text = text.to_vec();
    }

    fn next_record(&mut self, buf: &mut [f64]) -> Result<bool, FoodCalcError> {
        let width = self.fields.len();
        loop {
            let Some((number, text)) = self.next_line()? else {
                return Ok(false);
            };
            self.line = number;
            if self.star > 0 {
                if let Some(star_part) = text.trim_start().strip_prefix('*') {
                    self.split(star_part, number)?;
                    let mut star_values = vec![0.0; width];
                    self.parse_values(0..self.star, &mut star_values, number)?;
                    self.star_values.copy_from_slice(&star_values[..self.star]);
                    continue;
                }
            }
            self.split(&text, number)?;
            self.parse_values(self.star..width, buf, number)?;
            buf[..self.star].copy_from_slice(&self.star_values);
            return Ok(true);
        }
    }
}

fn strip_comment(text: &str, comment: char) -> &str {
    let mut quoted = false;
    for (i, c) in text.char_indices() {
        if c == '"' {
            quoted = !quoted;
        } else if c == comment && !quoted {
            return &text[..i];
        }
    }
    text
}

fn split_whitespace_quoted(text: &str) -> Option<Vec<String>> {
    let mut values = Vec::new();
    let mut chars = text.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            return Some(values);
        };
        let mut value = String::new();
        if first == '"' {
            chars.next();
            loop {
                match chars.next() {
                    None => return None,
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        value.push('"');
                    }
                    Some('"') => break,
                    Some(c) => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
            }
        }
        values.push(value);
    }
}

/// Parses `[+|-] digits [decimal-point digits]`. An empty value reads as zero.
pub(crate) fn parse_value(text: &str, decimal_point: char) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return Some(0.0);
    }
    let (negative, body) = match text.as_bytes()[0] {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (integer, fraction) = match body.split_once(decimal_point) {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    if !integer.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let normalized = format!(
        "{}.{}",
        if integer.is_empty() { "0" } else { integer },
        if fraction.is_empty() { "0" } else { fraction }
    );
    let value: f64 = normalized.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Formats an output value: at most four decimals with trailing zeros
/// dropped, `0` for anything closer to zero than 0.0001, and a decimal
/// exponent `eN` for magnitudes above 999 999 999.
pub fn format_value(value: f64, decimal_point: char) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value.abs() < 0.0001 {
        return "0".to_string();
    }
    let mut out = String::new();
    let mut num = value;
    if num < 0.0 {
        out.push('-');
        num = -num;
    }
    num += 0.00005;
    let mut exponent = 0;
    while num > 999_999_999.0 {
        exponent += 1;
        num /= 10.0;
    }
    let integer = num.trunc();
    out.push_str(&(integer as i64).to_string());
    let fraction = (((num - integer) * 10000.0) as i64).min(9999);
    if fraction > 0 {
        out.push(decimal_point);
        out.push_str(format!("{:04}", fraction).trim_end_matches('0'));
    }
    if exponent > 0 {
        out.push('e');
        out.push_str(&exponent.to_string());
    }
    out
}

/// Writes records as delimited text using [`format_value`].
pub struct DelimitedSink {
    name: String,
    writer: csv::Writer<Box<dyn Write>>,
    decimal_point: char,
}

impl DelimitedSink {
    pub fn new(name: &str, writer: Box<dyn Write>, dialect: Dialect) -> Self {
        let separator = if dialect.whitespace_separated() || !dialect.separator.is_ascii() {
            b' '
        } else {
            dialect.separator as u8
        };
        Self {
            name: name.to_string(),
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .delimiter(separator)
                .quote_style(csv::QuoteStyle::Necessary)
                .from_writer(writer),
            decimal_point: dialect.decimal_point,
        }
    }

    fn io_error(&self, e: impl ToString) -> FatalError {
        FatalError::Io {
            target: self.name.clone(),
            message: e.to_string(),
        }
    }
}

impl RecordSink for DelimitedSink {
    fn write_header(&mut self, names: &[String]) -> Result<(), FatalError> {
        self.writer.write_record(names).map_err(|e| self.io_error(e))
    }

    fn write_record(&mut self, values: &[f64]) -> Result<(), FatalError> {
        let decimal_point = self.decimal_point;
        let record = values.iter().map(|v| format_value(*v, decimal_point));
        self.writer.write_record(record).map_err(|e| self.io_error(e))
    }

    fn finish(&mut self) -> Result<(), FatalError> {
        self.writer.flush().map_err(|e| self.io_error(e))
    }
}
