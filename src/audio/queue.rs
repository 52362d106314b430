use rand::{seq::SliceRandom, Rng};
use serenity::model::id::UserId;
use tracing::{debug, info};

use crate::{
    audio::item::Item,
    error::{PlaybackError, PlaybackResult},
};

/// Items ya reproducidos que se conservan para `prev` y el listado
pub const HISTORY_LIMIT: usize = 50;

/// Cola de reproducción de una guild.
///
/// Los items no se eliminan al desencolar: `cursor` cuenta cuántos se han
/// entregado, así `prev` puede volver atrás y el listado sigue mostrando lo ya
/// reproducido. El item en `cursor - 1` es el que está sonando. Del historial
/// solo se guardan los últimos [`HISTORY_LIMIT`] items y no cuenta para
/// `max_size`.
///
/// El orden aleatorio se guarda aparte como permutación de índices, de modo que
/// `unshuffle` recupera el orden de inserción exacto.
#[derive(Debug)]
pub struct MusicQueue {
    items: Vec<Item>,
    shuffled: Option<Vec<usize>>,
    cursor: usize,
    max_size: usize,
}

impl MusicQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Vec::new(),
            shuffled: None,
            cursor: 0,
            max_size,
        }
    }

    /// Agrega un item al final de la cola
    pub fn enqueue(&mut self, item: Item) -> PlaybackResult<()> {
        if self.remaining() >= self.max_size {
            return Err(PlaybackError::QueueFull { max: self.max_size });
        }

        info!("➕ Agregado a la cola: {}", item.display_title());
        let index = self.items.len();
        self.items.push(item);
        if let Some(order) = self.shuffled.as_mut() {
            order.push(index);
        }

        Ok(())
    }

    /// Agrega varios items (playlist); devuelve cuántos cupieron
    pub fn enqueue_all(&mut self, items: impl IntoIterator<Item = Item>) -> usize {
        let mut added = 0;
        for item in items {
            if self.enqueue(item).is_err() {
                break;
            }
            added += 1;
        }

        info!("➕ Agregadas {} canciones a la cola", added);
        added
    }

    /// Entrega el siguiente item y avanza el cursor
    pub fn dequeue(&mut self) -> PlaybackResult<Item> {
        if self.cursor >= self.items.len() {
            return Err(PlaybackError::QueueEmpty);
        }

        let item = self.entry(self.cursor).clone();
        self.cursor += 1;
        debug!("➡️ Siguiente en cola ({}/{}): {}", self.cursor, self.items.len(), item.display_title());
        self.trim_history(HISTORY_LIMIT);
        Ok(item)
    }

    /// Descarta lo reproducido más allá de los últimos `keep` items del orden activo
    pub fn trim_history(&mut self, keep: usize) {
        let keep = keep.max(1);
        if self.cursor <= keep {
            return;
        }
        let dropped = self.cursor - keep;

        match self.shuffled.take() {
            None => {
                self.items.drain(..dropped);
            }
            Some(order) => {
                let mut removed = vec![false; self.items.len()];
                for &index in &order[..dropped] {
                    removed[index] = true;
                }

                let mut remap = vec![0; self.items.len()];
                let mut kept = Vec::with_capacity(self.items.len() - dropped);
                for (index, item) in std::mem::take(&mut self.items).into_iter().enumerate() {
                    if !removed[index] {
                        remap[index] = kept.len();
                        kept.push(item);
                    }
                }

                self.items = kept;
                self.shuffled = Some(order[dropped..].iter().map(|&index| remap[index]).collect());
            }
        }

        self.cursor -= dropped;
        debug!("🧹 {} items antiguos descartados del historial", dropped);
    }

    /// Mezcla lo que queda por reproducir. No hace nada si ya está mezclada.
    pub fn shuffle(&mut self) -> bool {
        self.shuffle_with(&mut rand::thread_rng())
    }

    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        if self.shuffled.is_some() {
            return false;
        }

        let mut order: Vec<usize> = (0..self.items.len()).collect();
        order[self.cursor..].shuffle(rng);
        self.shuffled = Some(order);
        info!("🔀 Cola mezclada ({} pendientes)", self.remaining());
        true
    }

    /// Restaura el orden de inserción. No hace nada si no está mezclada.
    pub fn unshuffle(&mut self) -> bool {
        let Some(order) = self.shuffled.take() else {
            return false;
        };

        // El item actual conserva su marca: el cursor queda justo después de él.
        if let Some(current) = self.cursor.checked_sub(1) {
            self.cursor = order[current] + 1;
        }

        info!("➡️ Orden original restaurado");
        true
    }

    pub fn prev(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn next(&mut self) {
        self.cursor = (self.cursor + 1).min(self.items.len());
    }

    /// Limpia la cola
    pub fn clear(&mut self) {
        self.items.clear();
        self.shuffled = None;
        self.cursor = 0;
        info!("🗑️ Cola limpiada");
    }

    pub fn current(&self) -> Option<&Item> {
        self.cursor.checked_sub(1).map(|pos| self.entry(pos))
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Total de items, incluidos los ya reproducidos
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn remaining(&self) -> usize {
        self.items.len() - self.cursor
    }

    /// Verdadero cuando no queda nada por desencolar
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled.is_some()
    }

    /// Items en el orden activo
    pub fn iter(&self) -> impl Iterator<Item = &Item> + '_ {
        (0..self.items.len()).map(move |pos| self.entry(pos))
    }

    /// Obtiene una página específica de la cola (1-indexada).
    ///
    /// Un número fuera de rango se ajusta a la última página.
    pub fn page(&self, page: usize, page_size: usize) -> QueuePage {
        let page_size = page_size.max(1);
        let total_pages = self.items.len().div_ceil(page_size);
        let page = page.clamp(1, total_pages.max(1));
        let start = (page - 1).saturating_mul(page_size);
        let end = start.saturating_add(page_size).min(self.items.len());
        let current = self.cursor.checked_sub(1);

        let entries = (start..end.max(start))
            .map(|pos| {
                let item = self.entry(pos);
                QueueEntry {
                    position: pos + 1,
                    title: item.display_title(),
                    requester: item.requester,
                    is_current: Some(pos) == current,
                }
            })
            .collect();

        QueuePage {
            entries,
            current_page: page,
            total_pages,
            total_items: self.items.len(),
        }
    }

    /// Página que contiene el item actual
    pub fn default_page(&self, page_size: usize) -> usize {
        match self.cursor.checked_sub(1) {
            Some(current) => current / page_size.max(1) + 1,
            None => 1,
        }
    }

    fn entry(&self, pos: usize) -> &Item {
        match &self.shuffled {
            Some(order) => &self.items[order[pos]],
            None => &self.items[pos],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub position: usize,
    pub title: String,
    pub requester: UserId,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePage {
    pub entries: Vec<QueueEntry>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}
