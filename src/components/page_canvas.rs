// ============================================================================
// PAGE CANVAS: the coloring surface of the currently displayed page
// ============================================================================
//
// Owns the one PixelBuffer of the selected page. The buffer is replaced
// wholesale on every load and never shared. Loads are tagged with the page
// and a monotonically increasing token; a result whose ticket no longer
// matches is dropped without touching the buffer.

use std::sync::mpsc;

use image::Rgb;

use crate::canvas::{
    self, CanvasSnapshot, DisplayRect, EncodeError, ImageLoadError, PixelBuffer, PointerEvent,
};
use crate::io::fetch_line_art;
use crate::ops::flood_fill::{self, FillOutcome, FillRequest};
use crate::project::{Page, PageId};
use crate::settings::AppSettings;

/// Identifies a load request. Results are applied only while the canvas is
/// still showing `page_id` and no newer load was started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    pub page_id: PageId,
    pub token: u64,
}

#[derive(Debug)]
pub enum LoadStatus {
    /// The buffer now holds the page.
    Applied { page_id: PageId },
    /// Superseded by a page switch or a newer load; discarded.
    Stale { page_id: PageId },
    /// The page shows a placeholder.
    Failed {
        page_id: PageId,
        error: ImageLoadError,
    },
}

/// Handle returned by [`PageCanvas::on_snapshot_ready`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type SnapshotObserver = Box<dyn FnMut(PageId, &CanvasSnapshot)>;

/// What a load job needs, detached from the session so it can run off-thread.
#[derive(Clone, Debug)]
pub struct PageSource {
    pub line_art: Option<String>,
    pub snapshot: Option<CanvasSnapshot>,
}

impl PageSource {
    pub fn of(page: &Page) -> Self {
        Self {
            line_art: page.line_art.clone(),
            snapshot: page.colored_snapshot.clone(),
        }
    }
}

/// Build the buffer for a page. A saved snapshot wins over the line art; an
/// undecodable snapshot falls back to the line art.
pub fn build_page_buffer(
    source: &PageSource,
    width: u32,
    height: u32,
) -> Result<PixelBuffer, ImageLoadError> {
    if let Some(snapshot) = &source.snapshot {
        match canvas::load_from_snapshot(snapshot, width, height) {
            Ok(buffer) => return Ok(buffer),
            Err(e) if source.line_art.is_some() => {
                log_warn!("Saved coloring unreadable ({}), redrawing line art", e);
            }
            Err(e) => return Err(e),
        }
    }

    let locator = source.line_art.as_deref().ok_or(ImageLoadError::MissingSource)?;
    let art = fetch_line_art(locator)?;
    canvas::load_source(&art, width, height)
}

struct LoadMessage {
    ticket: LoadTicket,
    result: Result<PixelBuffer, ImageLoadError>,
}

pub struct PageCanvas {
    buffer: Option<PixelBuffer>,
    page_id: Option<PageId>,
    load_token: u64,

    width: u32,
    height: u32,
    tolerance: u8,
    line_threshold: u8,

    observers: Vec<(ObserverId, SnapshotObserver)>,
    next_observer: u64,

    // Async load pipeline (rayon job → channel → poll_loads)
    load_sender: mpsc::Sender<LoadMessage>,
    load_receiver: mpsc::Receiver<LoadMessage>,
    pending_loads: usize,
}

impl PageCanvas {
    pub fn new(settings: &AppSettings) -> Self {
        let (load_sender, load_receiver) = mpsc::channel();
        Self {
            buffer: None,
            page_id: None,
            load_token: 0,
            width: settings.canvas_width,
            height: settings.canvas_height,
            tolerance: settings.tolerance,
            line_threshold: settings.line_threshold,
            observers: Vec::new(),
            next_observer: 0,
            load_sender,
            load_receiver,
            pending_loads: 0,
        }
    }

    pub fn page_id(&self) -> Option<PageId> {
        self.page_id
    }

    pub fn buffer(&self) -> Option<&PixelBuffer> {
        self.buffer.as_ref()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pending_loads(&self) -> usize {
        self.pending_loads
    }

    // ---- observers ----------------------------------------------------------

    /// Called synchronously with the new snapshot after every successful load
    /// and fill. Observers are dropped when the canvas switches page.
    pub fn on_snapshot_ready(
        &mut self,
        observer: impl FnMut(PageId, &CanvasSnapshot) + 'static,
    ) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    // ---- page switching / loading -------------------------------------------

    /// Point the canvas at `page_id`. Switching to a different page drops the
    /// old buffer and deregisters every observer before anything new is
    /// built. Re-attaching the same page keeps both.
    pub fn attach(&mut self, page_id: PageId) {
        if self.page_id == Some(page_id) {
            return;
        }
        if !self.observers.is_empty() {
            log_info!(
                "Page {} -> {}: dropping {} snapshot observer(s)",
                self.page_id.map_or("-".to_string(), |p| p.to_string()),
                page_id,
                self.observers.len()
            );
        }
        self.observers.clear();
        self.buffer = None;
        self.page_id = Some(page_id);
        // Invalidate loads still in flight for the previous page.
        self.load_token += 1;
    }

    /// Start a load for `page_id` and return its ticket. Any earlier ticket
    /// becomes stale.
    pub fn begin_load(&mut self, page_id: PageId) -> LoadTicket {
        self.attach(page_id);
        self.load_token += 1;
        LoadTicket {
            page_id,
            token: self.load_token,
        }
    }

    fn is_current(&self, ticket: LoadTicket) -> bool {
        self.page_id == Some(ticket.page_id) && self.load_token == ticket.token
    }

    /// Deliver the result of a load. The buffer is replaced in one step;
    /// observers are notified with the fresh snapshot.
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<PixelBuffer, ImageLoadError>,
    ) -> LoadStatus {
        if !self.is_current(ticket) {
            log_info!("Discarding stale load for page {}", ticket.page_id);
            return LoadStatus::Stale {
                page_id: ticket.page_id,
            };
        }

        match result {
            Ok(buffer) => {
                self.buffer = Some(buffer);
                self.publish_snapshot();
                LoadStatus::Applied {
                    page_id: ticket.page_id,
                }
            }
            Err(error) => {
                log_warn!("Page {} failed to load: {}", ticket.page_id, error);
                self.buffer = None;
                LoadStatus::Failed {
                    page_id: ticket.page_id,
                    error,
                }
            }
        }
    }

    /// Load a page on the calling thread.
    pub fn load_page(&mut self, page: &Page) -> LoadStatus {
        let ticket = self.begin_load(page.id);
        let result = build_page_buffer(&PageSource::of(page), self.width, self.height);
        self.complete_load(ticket, result)
    }

    /// Load a page on the rayon pool. The result arrives through
    /// [`PageCanvas::poll_loads`].
    pub fn spawn_load(&mut self, page: &Page) -> LoadTicket {
        let ticket = self.begin_load(page.id);
        let source = PageSource::of(page);
        let (width, height) = (self.width, self.height);
        let sender = self.load_sender.clone();
        self.pending_loads += 1;

        rayon::spawn(move || {
            let result = build_page_buffer(&source, width, height);
            let _ = sender.send(LoadMessage { ticket, result });
        });
        ticket
    }

    /// Apply every finished background load, in arrival order.
    pub fn poll_loads(&mut self) -> Vec<LoadStatus> {
        let mut statuses = Vec::new();
        while let Ok(msg) = self.load_receiver.try_recv() {
            self.pending_loads = self.pending_loads.saturating_sub(1);
            statuses.push(self.complete_load(msg.ticket, msg.result));
        }
        statuses
    }

    /// Block until one background load finishes (or the timeout passes) and
    /// apply it.
    pub fn wait_for_load(&mut self, timeout: std::time::Duration) -> Option<LoadStatus> {
        let msg = self.load_receiver.recv_timeout(timeout).ok()?;
        self.pending_loads = self.pending_loads.saturating_sub(1);
        Some(self.complete_load(msg.ticket, msg.result))
    }

    // ---- painting -----------------------------------------------------------

    /// Fill request at buffer coordinates using the canvas defaults.
    pub fn request_at(&self, x: i32, y: i32, color: Rgb<u8>) -> FillRequest {
        FillRequest::new(x, y, color)
            .with_tolerance(self.tolerance)
            .with_line_threshold(self.line_threshold)
    }

    /// Run a fill on the current buffer. Publishes a snapshot after `Filled`.
    /// Without a loaded page every request is out of bounds.
    pub fn fill(&mut self, request: &FillRequest) -> FillOutcome {
        let Some(buffer) = self.buffer.as_mut() else {
            return FillOutcome::OutOfBounds;
        };
        let outcome = flood_fill::fill(buffer, request);
        if outcome.is_filled() {
            self.publish_snapshot();
        }
        outcome
    }

    /// Pointer/touch input → buffer coordinates → fill.
    pub fn paint_at(
        &mut self,
        event: &PointerEvent,
        rect: &DisplayRect,
        color: Rgb<u8>,
    ) -> FillOutcome {
        let Some(buffer) = self.buffer.as_ref() else {
            return FillOutcome::OutOfBounds;
        };
        let Some((client_x, client_y)) = event.primary_point() else {
            return FillOutcome::OutOfBounds;
        };
        let (x, y) = canvas::map_pointer_to_buffer(client_x, client_y, rect, buffer);
        let request = self.request_at(x, y, color);
        self.fill(&request)
    }

    // ---- snapshots ----------------------------------------------------------

    pub fn export(&self) -> Result<CanvasSnapshot, EncodeError> {
        match &self.buffer {
            Some(buffer) => canvas::export_snapshot(buffer),
            None => Err(EncodeError::Uninitialized),
        }
    }

    /// Export and hand the snapshot to every observer. An unavailable
    /// snapshot is logged and skipped; observers keep their previous one.
    fn publish_snapshot(&mut self) {
        let Some(page_id) = self.page_id else { return };
        let snapshot = match self.export() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log_warn!("Snapshot unavailable for page {}: {}", page_id, e);
                return;
            }
        };
        for (_, observer) in self.observers.iter_mut() {
            observer(page_id, &snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::cell::RefCell;
    use std::rc::Rc;

    const RED: Rgb<u8> = Rgb([220, 30, 30]);

    fn settings(w: u32, h: u32) -> AppSettings {
        AppSettings {
            canvas_width: w,
            canvas_height: h,
            ..AppSettings::default()
        }
    }

    fn blank_page(id: PageId, w: u32, h: u32) -> Page {
        let snap = canvas::export_snapshot(&PixelBuffer::blank(w, h)).unwrap();
        Page {
            id,
            title: format!("Page {id}"),
            line_art: None,
            colored_snapshot: Some(snap),
        }
    }

    fn collector(canvas: &mut PageCanvas) -> Rc<RefCell<Vec<(PageId, CanvasSnapshot)>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        canvas.on_snapshot_ready(move |id, snap| sink.borrow_mut().push((id, snap.clone())));
        seen
    }

    #[test]
    fn load_and_fill_notify_observers() {
        let mut canvas = PageCanvas::new(&settings(8, 8));
        canvas.attach(1);
        let seen = collector(&mut canvas);

        assert!(matches!(
            canvas.load_page(&blank_page(1, 8, 8)),
            LoadStatus::Applied { page_id: 1 }
        ));
        assert_eq!(seen.borrow().len(), 1);

        let request = canvas.request_at(2, 2, RED);
        assert_eq!(canvas.fill(&request), FillOutcome::Filled { pixels: 64 });
        assert_eq!(seen.borrow().len(), 2);

        let (id, snap) = seen.borrow().last().cloned().unwrap();
        assert_eq!(id, 1);
        let restored = canvas::load_from_snapshot(&snap, 8, 8).unwrap();
        assert_eq!(restored.rgb_at(7, 7), RED);
    }

    #[test]
    fn no_op_fills_do_not_notify() {
        let mut canvas = PageCanvas::new(&settings(4, 4));
        canvas.load_page(&blank_page(1, 4, 4));
        let seen = collector(&mut canvas);

        let request = canvas.request_at(-1, 0, RED);
        assert_eq!(canvas.fill(&request), FillOutcome::OutOfBounds);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn switching_page_deregisters_observers() {
        let mut canvas = PageCanvas::new(&settings(4, 4));
        canvas.attach(1);
        let seen = collector(&mut canvas);
        assert_eq!(canvas.observer_count(), 1);

        canvas.attach(1);
        assert_eq!(canvas.observer_count(), 1);

        canvas.load_page(&blank_page(2, 4, 4));
        assert_eq!(canvas.observer_count(), 0);
        assert!(seen.borrow().is_empty());
        assert_eq!(canvas.page_id(), Some(2));
    }

    #[test]
    fn remove_observer_stops_notifications() {
        let mut canvas = PageCanvas::new(&settings(4, 4));
        canvas.attach(1);
        let calls = Rc::new(RefCell::new(0));
        let c = Rc::clone(&calls);
        let id = canvas.on_snapshot_ready(move |_, _| *c.borrow_mut() += 1);
        assert!(canvas.remove_observer(id));
        assert!(!canvas.remove_observer(id));
        canvas.load_page(&blank_page(1, 4, 4));
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn stale_load_for_previous_page_is_discarded() {
        let mut canvas = PageCanvas::new(&settings(4, 4));
        let old = canvas.begin_load(1);
        let current = canvas.begin_load(2);

        let status = canvas.complete_load(old, Ok(PixelBuffer::blank(4, 4)));
        assert!(matches!(status, LoadStatus::Stale { page_id: 1 }));
        assert!(canvas.buffer().is_none());

        let status = canvas.complete_load(current, Ok(PixelBuffer::blank(4, 4)));
        assert!(matches!(status, LoadStatus::Applied { page_id: 2 }));
        assert!(canvas.buffer().is_some());
    }

    #[test]
    fn newer_load_of_same_page_supersedes_older() {
        let mut canvas = PageCanvas::new(&settings(4, 4));
        let first = canvas.begin_load(3);
        let second = canvas.begin_load(3);
        assert!(matches!(
            canvas.complete_load(first, Ok(PixelBuffer::blank(4, 4))),
            LoadStatus::Stale { .. }
        ));
        assert!(matches!(
            canvas.complete_load(second, Ok(PixelBuffer::blank(4, 4))),
            LoadStatus::Applied { .. }
        ));
    }

    #[test]
    fn snapshot_takes_priority_over_line_art() {
        let mut page = blank_page(1, 4, 4);
        // Locator that would fail if it were used.
        page.line_art = Some("/nonexistent/line-art.png".into());
        let mut canvas = PageCanvas::new(&settings(4, 4));
        assert!(matches!(canvas.load_page(&page), LoadStatus::Applied { .. }));
    }

    #[test]
    fn unreadable_snapshot_falls_back_to_line_art() {
        let dir = tempfile::tempdir().unwrap();
        let art = dir.path().join("art.png");
        RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])).save(&art).unwrap();

        let page = Page {
            id: 1,
            title: "p".into(),
            line_art: Some(art.to_string_lossy().into_owned()),
            colored_snapshot: Some(CanvasSnapshot::from_png_bytes(vec![0; 10])),
        };
        let mut canvas = PageCanvas::new(&settings(4, 4));
        assert!(matches!(canvas.load_page(&page), LoadStatus::Applied { .. }));
        assert_eq!(canvas.buffer().unwrap().rgb_at(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn page_without_any_source_fails_softly() {
        let mut canvas = PageCanvas::new(&settings(4, 4));
        let status = canvas.load_page(&Page::new(5, "empty"));
        assert!(matches!(
            status,
            LoadStatus::Failed {
                page_id: 5,
                error: ImageLoadError::MissingSource
            }
        ));
        assert!(canvas.export().is_err());
        let request = canvas.request_at(0, 0, RED);
        assert_eq!(canvas.fill(&request), FillOutcome::OutOfBounds);
    }

    #[test]
    fn tainted_canvas_fills_but_publishes_nothing() {
        let mut canvas = PageCanvas::new(&settings(4, 4));
        let ticket = canvas.begin_load(1);
        let seen = collector(&mut canvas);
        let white = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let art = canvas::LineArt::tainted(white);
        canvas.complete_load(ticket, canvas::load_source(&art, 4, 4));

        let request = canvas.request_at(1, 1, RED);
        assert!(canvas.fill(&request).is_filled());
        assert!(seen.borrow().is_empty());
        assert!(matches!(canvas.export(), Err(EncodeError::Tainted)));
    }

    #[test]
    fn paint_at_maps_pointer_through_display_rect() {
        let mut canvas = PageCanvas::new(&settings(10, 10));
        let ticket = canvas.begin_load(1);
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        for y in 0..10 {
            img.put_pixel(5, y, Rgba([0, 0, 0, 255]));
        }
        canvas.complete_load(ticket, Ok(PixelBuffer::from_rgba(img)));

        // Canvas shown at 2x, offset by (100, 100).
        let rect = DisplayRect::new(100.0, 100.0, 20.0, 20.0);
        let tap = PointerEvent::Mouse {
            client_x: 104.0,
            client_y: 110.0,
        };
        assert_eq!(
            canvas.paint_at(&tap, &rect, RED),
            FillOutcome::Filled { pixels: 50 }
        );
        let buffer = canvas.buffer().unwrap();
        assert_eq!(buffer.rgb_at(2, 5), RED);
        assert_eq!(buffer.rgb_at(7, 5), Rgb([255, 255, 255]));

        let on_line = PointerEvent::Touch {
            points: vec![(111.0, 101.0), (104.0, 104.0)],
        };
        assert_eq!(canvas.paint_at(&on_line, &rect, RED), FillOutcome::HitLine);

        let outside = PointerEvent::Mouse {
            client_x: 90.0,
            client_y: 105.0,
        };
        assert_eq!(canvas.paint_at(&outside, &rect, RED), FillOutcome::OutOfBounds);
    }

    #[test]
    fn background_load_is_delivered_through_poll() {
        let mut canvas = PageCanvas::new(&settings(6, 6));
        let ticket = canvas.spawn_load(&blank_page(1, 6, 6));
        assert_eq!(ticket.page_id, 1);
        assert_eq!(canvas.pending_loads(), 1);

        let status = canvas
            .wait_for_load(std::time::Duration::from_secs(10))
            .expect("load finished");
        assert!(matches!(status, LoadStatus::Applied { page_id: 1 }));
        assert_eq!(canvas.pending_loads(), 0);
        assert!(canvas.poll_loads().is_empty());
    }

    #[test]
    fn poll_loads_drains_every_finished_job() {
        let mut canvas = PageCanvas::new(&settings(6, 6));
        let seen = Rc::new(RefCell::new(Vec::new()));

        canvas.spawn_load(&blank_page(1, 6, 6));
        canvas.spawn_load(&blank_page(2, 6, 6));
        let sink = Rc::clone(&seen);
        canvas.on_snapshot_ready(move |id, _| sink.borrow_mut().push(id));
        assert_eq!(canvas.pending_loads(), 2);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        let mut statuses = Vec::new();
        while canvas.pending_loads() > 0 && std::time::Instant::now() < deadline {
            statuses.extend(canvas.poll_loads());
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        assert_eq!(canvas.pending_loads(), 0);
        assert_eq!(statuses.len(), 2);
        let applied: Vec<_> = statuses
            .iter()
            .filter_map(|s| match s {
                LoadStatus::Applied { page_id } => Some(*page_id),
                _ => None,
            })
            .collect();
        let stale: Vec<_> = statuses
            .iter()
            .filter_map(|s| match s {
                LoadStatus::Stale { page_id } => Some(*page_id),
                _ => None,
            })
            .collect();
        assert_eq!(applied, vec![2]);
        assert_eq!(stale, vec![1]);
        assert_eq!(*seen.borrow(), vec![2]);
        assert_eq!(canvas.page_id(), Some(2));
        assert!(canvas.buffer().is_some());
    }

    #[test]
    fn background_load_for_abandoned_page_is_stale() {
        let mut canvas = PageCanvas::new(&settings(6, 6));
        canvas.spawn_load(&blank_page(1, 6, 6));
        canvas.attach(2);

        let status = canvas
            .wait_for_load(std::time::Duration::from_secs(10))
            .expect("load finished");
        assert!(matches!(status, LoadStatus::Stale { page_id: 1 }));
        assert!(canvas.buffer().is_none());
    }
}
