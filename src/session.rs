//! Client-held state: the cart being built and the durable access token.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{AccessToken, CartLine};
use crate::validation;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session storage error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt session file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stored access token in {0} is empty")]
    InvalidToken(PathBuf),
}

/// Items the visitor intends to buy. Lines are unique per product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `line`, merging quantities with an existing line for the same product.
    /// The newest name and price win.
    pub fn add(&mut self, line: CartLine) {
        match self
            .lines
            .iter_mut()
            .find(|existing| existing.product_id == line.product_id)
        {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(line.quantity);
                existing.name = line.name;
                existing.unit_price = line.unit_price;
            }
            None => self.lines.push(line),
        }
    }

    /// Sets the quantity of a product; zero or less removes the line.
    /// Returns false when the product is not in the cart.
    pub fn set_quantity(&mut self, product_id: &str, quantity: i32) -> bool {
        if quantity <= 0 {
            return self.remove(product_id);
        }
        match self.lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => {
                line.quantity = quantity;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, product_id: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);
        self.lines.len() != before
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// `None` when the lines overflow a `Decimal`.
    pub fn subtotal(&self) -> Option<Decimal> {
        validation::cart_total(&self.lines)
    }

    /// Reads a cart saved with [`Cart::save`]; a missing file is an empty cart.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        ensure_parent(path)?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        debug!(path = %path.display(), lines = self.lines.len(), "Cart saved");
        Ok(())
    }
}

/// Durable storage for the visitor's access token.
#[derive(Debug, Clone)]
pub struct AccessTokenStore {
    path: PathBuf,
}

impl AccessTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored token, if any.
    pub fn load(&self) -> Result<Option<AccessToken>, SessionError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => AccessToken::parse(raw)
                .map(Some)
                .ok_or_else(|| SessionError::InvalidToken(self.path.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the stored token, generating and persisting one on first use.
    pub fn load_or_create(&self) -> Result<AccessToken, SessionError> {
        if let Some(token) = self.load()? {
            return Ok(token);
        }
        let token = AccessToken::generate();
        ensure_parent(&self.path)?;
        fs::write(&self.path, token.as_str())?;
        info!(path = %self.path.display(), "Issued new access token");
        Ok(token)
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn line(id: &str, price: Decimal, quantity: i32) -> CartLine {
        CartLine {
            product_id: id.into(),
            name: format!("Produto {id}"),
            unit_price: price,
            quantity,
        }
    }

    #[test]
    fn adding_the_same_product_merges_lines() {
        let mut cart = Cart::new();
        cart.add(line("p1", dec!(29.90), 1));
        cart.add(line("p1", dec!(29.90), 1));
        cart.add(line("p2", dec!(10.00), 3));

        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.lines()[0].quantity, 2);
        assert_eq!(cart.subtotal(), Some(dec!(89.80)));
    }

    #[test]
    fn quantity_zero_removes_the_line() {
        let mut cart = Cart::new();
        cart.add(line("p1", dec!(29.90), 2));
        assert!(cart.set_quantity("p1", 5));
        assert_eq!(cart.subtotal(), Some(dec!(149.50)));
        assert!(cart.set_quantity("p1", 0));
        assert!(cart.is_empty());
        assert!(!cart.set_quantity("missing", 1));
    }

    #[test]
    fn cart_survives_a_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session").join("cart.json");

        assert!(Cart::load(&path).unwrap().is_empty());

        let mut cart = Cart::new();
        cart.add(line("p1", dec!(29.90), 2));
        cart.save(&path).unwrap();

        assert_eq!(Cart::load(&path).unwrap(), cart);
    }

    #[test]
    fn token_is_created_once_and_reused() {
        let dir = tempdir().unwrap();
        let store = AccessTokenStore::new(dir.path().join("access_token"));

        assert!(store.load().unwrap().is_none());
        let first = store.load_or_create().unwrap();
        let second = AccessTokenStore::new(store.path()).load_or_create().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn blank_token_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access_token");
        fs::write(&path, "  \n").unwrap();

        assert_matches!(
            AccessTokenStore::new(&path).load_or_create(),
            Err(SessionError::InvalidToken(_))
        );
    }
}
