use std::collections::HashMap;

use crate::{parse_card_value, Vote};

/// The computed statistics for one round of voting
#[derive(Debug, Clone, PartialEq)]
pub struct VoteStatistics {
    /// Mean of the numeric votes, rounded to two decimals
    pub average: Option<f64>,
    /// Median of the numeric votes, rounded to two decimals
    pub median: Option<f64>,
    /// The single most common value across all votes, numeric or not
    pub mode: Option<String>,
    pub total_votes: usize,
    /// Share of votes matching the most common value, as a whole percentage
    pub agreement: u32,
}

fn round_2(value: f64) -> f64 {
    (value * 100.).round() / 100.
}

/// Computes statistics over a round of votes.
///
/// Votes with special values (`?`, `coffee`, t-shirt sizes) count towards the
/// mode and agreement but are excluded from average and median.
pub fn statistics(votes: &[Vote]) -> VoteStatistics {
    let mut numeric: Vec<f64> = votes
        .iter()
        .filter_map(|v| parse_card_value(&v.value))
        .collect();

    numeric.sort_by(f64::total_cmp);

    let average = if numeric.is_empty() {
        None
    } else {
        Some(round_2(numeric.iter().sum::<f64>() / numeric.len() as f64))
    };

    let median = if numeric.is_empty() {
        None
    } else {
        let mid = numeric.len() / 2;
        let median = if numeric.len() % 2 != 0 {
            numeric[mid]
        } else {
            (numeric[mid - 1] + numeric[mid]) / 2.
        };
        Some(round_2(median))
    };

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for vote in votes {
        *counts.entry(vote.value.as_str()).or_default() += 1;
    }

    let max_count = counts.values().copied().max().unwrap_or(0);
    let modes: Vec<&str> = counts
        .iter()
        .filter(|(_, &count)| count == max_count)
        .map(|(&value, _)| value)
        .collect();

    // A tie for the highest count means there is no mode
    let mode = match modes.as_slice() {
        [single] => Some(single.to_string()),
        _ => None,
    };

    let agreement = if votes.is_empty() {
        0
    } else {
        (max_count as f64 / votes.len() as f64 * 100.).round() as u32
    };

    VoteStatistics {
        average,
        median,
        mode,
        total_votes: votes.len(),
        agreement,
    }
}

/// Groups votes by value for presentation, largest group first.
///
/// Derived on demand, never stored.
pub fn distribution(votes: &[Vote]) -> Vec<(String, Vec<Vote>)> {
    let mut groups: Vec<(String, Vec<Vote>)> = Vec::new();

    for vote in votes {
        match groups.iter_mut().find(|(value, _)| *value == vote.value) {
            Some((_, group)) => group.push(vote.clone()),
            None => groups.push((vote.value.clone(), vec![vote.clone()])),
        }
    }

    groups.sort_by(|(_, a), (_, b)| b.len().cmp(&a.len()));
    groups
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;

    fn votes_of(values: &[&str]) -> Vec<Vote> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| Vote {
                id: format!("v{}", i),
                story_id: "s1".to_string(),
                user_id: format!("u{}", i),
                user_name: format!("user {}", i),
                value: value.to_string(),
                voted_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn numeric_round() {
        let stats = statistics(&votes_of(&["1", "2", "2", "3"]));

        assert_eq!(stats.average, Some(2.));
        assert_eq!(stats.median, Some(2.));
        assert_eq!(stats.mode, Some("2".to_string()));
        assert_eq!(stats.total_votes, 4);
        assert_eq!(stats.agreement, 50);
    }

    #[test]
    fn special_votes_still_have_a_mode() {
        let stats = statistics(&votes_of(&["?", "?", "coffee"]));

        assert_eq!(stats.average, None);
        assert_eq!(stats.median, None);
        assert_eq!(stats.mode, Some("?".to_string()));
        assert_eq!(stats.agreement, 67);
    }

    #[test]
    fn tie_means_no_mode() {
        let stats = statistics(&votes_of(&["3", "3", "5", "5"]));

        assert_eq!(stats.mode, None);
        assert_eq!(stats.agreement, 50);
    }

    #[test]
    fn even_count_interpolates_median() {
        let stats = statistics(&votes_of(&["1", "2", "5", "8"]));

        assert_eq!(stats.average, Some(4.));
        assert_eq!(stats.median, Some(3.5));
    }

    #[test]
    fn mixed_votes_only_average_numerics() {
        let stats = statistics(&votes_of(&["5", "5", "coffee"]));

        assert_eq!(stats.average, Some(5.));
        assert_eq!(stats.median, Some(5.));
        assert_eq!(stats.mode, Some("5".to_string()));
        assert_eq!(stats.agreement, 67);
    }

    #[test]
    fn empty_votes() {
        let stats = statistics(&[]);

        assert_eq!(stats.average, None);
        assert_eq!(stats.median, None);
        assert_eq!(stats.mode, None);
        assert_eq!(stats.total_votes, 0);
        assert_eq!(stats.agreement, 0);
    }

    #[test]
    fn distribution_groups_by_value() {
        let groups = distribution(&votes_of(&["3", "5", "3", "8", "3"]));

        assert_eq!(groups[0].0, "3");
        assert_eq!(groups[0].1.len(), 3);
        assert_eq!(groups.len(), 3);
    }
}
