//! Classification of the engine's short mode tags.
//!
//! The tag's leading character decides insert-likeness ("i…", "R…"), the
//! final character distinguishes the visual/select sub-variants.

/// Shape of a visual-family selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionShape {
  Charwise,
  Linewise,
  Blockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
  Normal,
  Insert,
  Replace,
  Visual(SelectionShape),
  Select(SelectionShape),
  CommandLine,
  Other,
}

impl ModeKind {
  /// Modes during which the host editor is the temporary content authority.
  pub fn is_insert_like(self) -> bool {
    matches!(self, Self::Insert | Self::Replace)
  }

  pub fn visual_shape(self) -> Option<SelectionShape> {
    match self {
      Self::Visual(shape) | Self::Select(shape) => Some(shape),
      _ => None,
    }
  }
}

const CTRL_V: char = '\u{16}';
const CTRL_S: char = '\u{13}';

pub fn classify_mode(tag: &str) -> ModeKind {
  let mut chars = tag.chars();
  let Some(first) = chars.next() else {
    return ModeKind::Other;
  };
  match first {
    'i' => return ModeKind::Insert,
    'R' => return ModeKind::Replace,
    'c' => return ModeKind::CommandLine,
    _ => {},
  }

  match tag.chars().next_back() {
    Some('v') => ModeKind::Visual(SelectionShape::Charwise),
    Some('V') => ModeKind::Visual(SelectionShape::Linewise),
    Some(CTRL_V) => ModeKind::Visual(SelectionShape::Blockwise),
    Some('s') => ModeKind::Select(SelectionShape::Charwise),
    Some('S') => ModeKind::Select(SelectionShape::Linewise),
    Some(CTRL_S) => ModeKind::Select(SelectionShape::Blockwise),
    _ if first == 'n' => ModeKind::Normal,
    _ => ModeKind::Other,
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn insert_family_tags() {
    for tag in ["i", "ic", "ix"] {
      assert_eq!(classify_mode(tag), ModeKind::Insert);
      assert!(classify_mode(tag).is_insert_like());
    }
    for tag in ["R", "Rv", "Rx"] {
      assert_eq!(classify_mode(tag), ModeKind::Replace);
      assert!(classify_mode(tag).is_insert_like());
    }
  }

  #[test]
  fn visual_family_is_keyed_on_the_final_character() {
    assert_eq!(
      classify_mode("v"),
      ModeKind::Visual(SelectionShape::Charwise)
    );
    assert_eq!(
      classify_mode("V"),
      ModeKind::Visual(SelectionShape::Linewise)
    );
    assert_eq!(
      classify_mode("\u{16}"),
      ModeKind::Visual(SelectionShape::Blockwise)
    );
    assert_eq!(
      classify_mode("nov"),
      ModeKind::Visual(SelectionShape::Charwise)
    );
    assert_eq!(
      classify_mode("S"),
      ModeKind::Select(SelectionShape::Linewise)
    );
  }

  #[test]
  fn normal_and_cmdline() {
    assert_eq!(classify_mode("n"), ModeKind::Normal);
    assert_eq!(classify_mode("no"), ModeKind::Normal);
    assert_eq!(classify_mode("niI"), ModeKind::Normal);
    assert_eq!(classify_mode("c"), ModeKind::CommandLine);
    assert_eq!(classify_mode(""), ModeKind::Other);
    assert!(!classify_mode("n").is_insert_like());
  }
}
