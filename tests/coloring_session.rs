// End-to-end coloring flow over the public library API.

use std::cell::RefCell;
use std::rc::Rc;

use colorbook::canvas::{self, DisplayRect, LineArt, PointerEvent};
use colorbook::io::{ColoringStore, FileStore, MemoryStore};
use colorbook::project::{Page, Scene, StorySession};
use colorbook::{AppSettings, FillOutcome, LoadStatus, PageCanvas};
use image::{Rgb, Rgba, RgbaImage};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// 40x20 page split by a vertical stroke at x = 20.
fn split_page(dir: &std::path::Path, name: &str) -> String {
    let mut img = RgbaImage::from_pixel(40, 20, WHITE);
    for y in 0..20 {
        img.put_pixel(20, y, INK);
    }
    let path = dir.join(name);
    img.save(&path).unwrap();
    path.to_string_lossy().into_owned()
}

fn settings() -> AppSettings {
    AppSettings {
        canvas_width: 40,
        canvas_height: 20,
        ..AppSettings::default()
    }
}

fn scenes(n: u32) -> Vec<Scene> {
    (1..=n)
        .map(|id| Scene {
            id,
            title: format!("Scene {id}"),
            text: String::new(),
            summary: String::new(),
        })
        .collect()
}

#[test]
fn colors_persist_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let story = "The fox found a red kite.";
    let theme = "meadow";

    let mut session = StorySession::from_scenes(story, theme, &scenes(2));
    session.set_line_art(1, split_page(dir.path(), "p1.png"));
    session.set_line_art(2, split_page(dir.path(), "p2.png"));

    let mut store = ColoringStore::new(FileStore::new(dir.path().join("store")));
    assert!(store.load(&session.story_hash()).is_none());

    // Color the left half of page 1.
    let mut canvas = PageCanvas::new(&settings());
    let page = session.selected_page().cloned().unwrap();
    canvas.attach(page.id);
    let latest = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&latest);
    canvas.on_snapshot_ready(move |id, snap| *sink.borrow_mut() = Some((id, snap.clone())));
    assert!(matches!(canvas.load_page(&page), LoadStatus::Applied { .. }));

    let rect = DisplayRect::new(0.0, 0.0, 80.0, 40.0);
    let tap = PointerEvent::Touch {
        points: vec![(10.0, 10.0)],
    };
    assert_eq!(
        canvas.paint_at(&tap, &rect, Rgb([0, 160, 0])),
        FillOutcome::Filled { pixels: 400 }
    );

    let (id, snap) = latest.borrow_mut().take().unwrap();
    assert!(session.apply_snapshot(id, snap));
    assert!(store.save(&session.story_hash(), &session.snapshots()));

    // A fresh session of the same story picks the coloring back up.
    let mut resumed = StorySession::from_scenes(story, theme, &scenes(2));
    resumed.set_line_art(1, split_page(dir.path(), "p1.png"));
    let saved = store.load(&resumed.story_hash()).unwrap();
    assert_eq!(resumed.merge_saved(&saved), 1);

    let mut canvas = PageCanvas::new(&settings());
    let page = resumed.page(1).cloned().unwrap();
    canvas.load_page(&page);
    let buffer = canvas.buffer().unwrap();
    assert_eq!(buffer.rgb_at(5, 5), Rgb([0, 160, 0]));
    assert_eq!(buffer.rgb_at(30, 5), Rgb([255, 255, 255]));

    // Another theme is another story.
    let other = StorySession::from_scenes(story, "ocean", &scenes(2));
    assert!(store.load(&other.story_hash()).is_none());
}

#[test]
fn page_switch_drops_observers_and_late_loads() {
    let dir = tempfile::tempdir().unwrap();
    let p1 = Page::new(1, "one").with_line_art(split_page(dir.path(), "a.png"));
    let p2 = Page::new(2, "two").with_line_art(split_page(dir.path(), "b.png"));

    let mut canvas = PageCanvas::new(&settings());
    canvas.attach(1);
    let calls = Rc::new(RefCell::new(0u32));
    let counter = Rc::clone(&calls);
    canvas.on_snapshot_ready(move |_, _| *counter.borrow_mut() += 1);

    let slow = canvas.begin_load(p1.id);
    assert!(matches!(canvas.load_page(&p2), LoadStatus::Applied { page_id: 2 }));
    assert_eq!(canvas.observer_count(), 0);

    // The page-1 result arrives after the switch and is ignored.
    let late = canvas::load_source(&LineArt::new(RgbaImage::from_pixel(40, 20, INK)), 40, 20);
    assert!(matches!(canvas.complete_load(slow, late), LoadStatus::Stale { page_id: 1 }));
    assert_eq!(canvas.buffer().unwrap().rgb_at(0, 0), Rgb([255, 255, 255]));

    let request = canvas.request_at(30, 10, Rgb([9, 9, 9]));
    assert!(canvas.fill(&request).is_filled());
    assert_eq!(*calls.borrow(), 0);
}

#[test]
fn full_store_keeps_coloring_in_memory() {
    let mut session = StorySession::from_scenes("tiny", "t", &scenes(1));
    let snap = canvas::export_snapshot(&canvas::PixelBuffer::blank(16, 16)).unwrap();
    session.apply_snapshot(1, snap.clone());

    let mut store = ColoringStore::new(MemoryStore::with_quota(8));
    assert!(!store.save(&session.story_hash(), &session.snapshots()));
    assert!(store.load(&session.story_hash()).is_none());
    assert_eq!(session.page(1).unwrap().colored_snapshot.as_ref(), Some(&snap));
}
