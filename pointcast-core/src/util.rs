use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// The palette participants pick their avatar color from
pub const AVATAR_COLORS: &[&str] = &[
    "#EF4444", // red
    "#F97316", // orange
    "#F59E0B", // amber
    "#EAB308", // yellow
    "#84CC16", // lime
    "#22C55E", // green
    "#10B981", // emerald
    "#14B8A6", // teal
    "#06B6D4", // cyan
    "#0EA5E9", // sky
    "#3B82F6", // blue
    "#6366F1", // indigo
    "#8B5CF6", // violet
    "#A855F7", // purple
    "#D946EF", // fuchsia
    "#EC4899", // pink
    "#F43F5E", // rose
];

pub fn random_avatar_color() -> String {
    let index = thread_rng().gen_range(0..AVATAR_COLORS.len());
    AVATAR_COLORS[index].to_string()
}

pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn random_color_is_from_palette() {
        for _ in 0..50 {
            let color = random_avatar_color();
            assert!(AVATAR_COLORS.contains(&color.as_str()));
        }
    }
}
