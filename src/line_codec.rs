//! Line-level text format.
//!
//! Input lines look like `GROUND_TRUTH||PREDICTED CONFIDENCE`; output lines
//! append the corrected token: `GROUND_TRUTH||PREDICTED CONFIDENCE CORRECTED`
//! with the confidence rendered to four decimals.
//!
//! Parsing never fails. Malformed lines degrade to a best-effort record.

/// Separates the ground truth from the OCR side of a line.
pub const DELIMITER: &str = "||";

/// Split a raw line into `(ground_truth, predicted, confidence)`.
///
/// With the delimiter present, the last whitespace token on the right side
/// is the confidence and everything before it is the prediction. If that
/// token is not a number the whole right side is kept as the prediction and
/// the confidence is `0.0`.
///
/// Without the delimiter the line is read as `GT PRED... CONF`.
pub fn parse(line: &str) -> (String, String, f64) {
    let Some((gt, right)) = line.split_once(DELIMITER) else {
        return parse_undelimited(line);
    };

    let gt = gt.trim().to_string();
    let right = right.trim();

    let tokens: Vec<&str> = right.split_whitespace().collect();
    let Some((last, head)) = tokens.split_last() else {
        return (gt, String::new(), 0.0);
    };

    match last.parse::<f64>() {
        Ok(confidence) => (gt, head.join(" "), confidence),
        Err(_) => (gt, right.to_string(), 0.0),
    }
}

fn parse_undelimited(line: &str) -> (String, String, f64) {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((first, rest)) = parts.split_first() else {
        return (String::new(), String::new(), 0.0);
    };

    match rest.split_last() {
        None => (first.to_string(), String::new(), 0.0),
        Some((last, middle)) => match last.parse::<f64>() {
            Ok(confidence) => (first.to_string(), middle.join(" "), confidence),
            Err(_) => (first.to_string(), rest.join(" "), 0.0),
        },
    }
}

/// Compose an output line.
pub fn rebuild(ground_truth: &str, predicted: &str, confidence: f64, corrected: &str) -> String {
    format!("{ground_truth}{DELIMITER}{predicted} {confidence:.4} {corrected}")
        .trim()
        .to_string()
}
