//! Shared fixtures for the integration tests
//!
//! Blog schema:
//! - Account: no lazy attributes; has_many pages
//! - User has_many posts; `bio` is lazy
//! - Post belongs_to author, has_many comments, has_and_belongs_to_many tags,
//!   has_many categories through categorizations; `body` and `summary` are lazy
//! - Page carries a standing default selection
//! - SpecialPost is an STI subtype of Post (separate catalog, `type` column),
//!   reachable from Author through has_many special_posts

#![allow(dead_code)]

use lifeguard_lazy::{AssociationDef, Catalog, ColumnName, EntityDef, Filter, MemoryStore, Select};
use sea_query::Value;

// ============================================================================
// Catalog
// ============================================================================

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.register(
        EntityDef::new("Account", "accounts")
            .columns(["id", "name"])
            .association(AssociationDef::has_many("pages", "Page")),
    );
    catalog.register(
        EntityDef::new("User", "users")
            .columns(["id", "name", "email", "bio"])
            .lazy(["bio"])
            .association(AssociationDef::has_many("posts", "Post").foreign_key("author_id")),
    );
    catalog.register(
        EntityDef::new("Post", "posts")
            .columns(["id", "author_id", "title", "permalink", "body", "summary"])
            .lazy(["body", "summary"])
            .association(AssociationDef::belongs_to("author", "User").foreign_key("author_id"))
            .association(AssociationDef::has_many("comments", "Comment"))
            .association(AssociationDef::has_and_belongs_to_many("tags", "Tag"))
            .association(AssociationDef::has_many("categorizations", "Categorization"))
            .association(
                AssociationDef::has_many_through("categories", "Category", "categorizations")
                    .distinct(true),
            )
            .association(
                AssociationDef::has_many("named_comments", "Comment")
                    .select(Select::columns(["id", "post_id", "name"])),
            )
            .association(
                AssociationDef::has_many("first_comments", "Comment")
                    .condition(Filter::eq(ColumnName::qualified("comments", "name"), "c1")),
            )
            .association(
                AssociationDef::has_many_through("tech_categories", "Category", "categorizations")
                    .source("category")
                    .select(Select::qualified("categories", ["id", "name", "description"]))
                    .condition(Filter::eq(ColumnName::qualified("categories", "name"), "tech")),
            ),
    );
    catalog.register(
        EntityDef::new("Comment", "comments")
            .columns(["id", "post_id", "name", "body"])
            .lazy(["body"]),
    );
    catalog.register(
        EntityDef::new("Tag", "tags")
            .columns(["id", "name", "description"])
            .lazy(["description"]),
    );
    catalog.register(
        EntityDef::new("Categorization", "categorizations")
            .columns(["id", "post_id", "category_id"])
            .association(AssociationDef::belongs_to("category", "Category")),
    );
    catalog.register(
        EntityDef::new("Category", "categories")
            .columns(["id", "name", "description"])
            .lazy(["description"]),
    );
    catalog.register(
        EntityDef::new("Page", "pages")
            .columns(["id", "account_id", "title", "content"])
            .lazy(["content"])
            .default_select(Select::columns(["id", "account_id", "title", "content"])),
    );
    catalog
}

pub fn sti_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    let post = catalog.register(
        EntityDef::new("Post", "posts")
            .columns(["id", "author_id", "type", "title", "body"])
            .lazy(["body"]),
    );
    catalog.register(EntityDef::subtype_of("SpecialPost", &post));
    catalog.register(
        EntityDef::new("Author", "authors")
            .columns(["id", "name"])
            .association(AssociationDef::has_many("special_posts", "SpecialPost")),
    );
    catalog
}

// ============================================================================
// Data
// ============================================================================

fn post(store: &MemoryStore, id: i32, author: i32, title: &str) {
    store.insert(
        "posts",
        [
            ("id", Value::from(id)),
            ("author_id", Value::from(author)),
            ("title", title.into()),
            ("permalink", title.to_lowercase().into()),
            ("body", format!("Body of {title}").into()),
            ("summary", format!("Summary of {title}").into()),
        ],
    );
}

pub fn store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert("accounts", [("id", Value::from(1)), ("name", "Acme".into())]);

    for (id, name) in [(1, "Ann"), (2, "Bob")] {
        store.insert(
            "users",
            [
                ("id", Value::from(id)),
                ("name", name.into()),
                ("email", format!("{}@example.com", name.to_lowercase()).into()),
                ("bio", format!("{name} writes").into()),
            ],
        );
    }

    post(&store, 1, 1, "First");
    post(&store, 2, 1, "Second");
    post(&store, 3, 2, "Third");

    for (id, post_id, name) in [(1, 1, "c1"), (2, 1, "c2"), (3, 2, "c3")] {
        store.insert(
            "comments",
            [
                ("id", Value::from(id)),
                ("post_id", Value::from(post_id)),
                ("name", name.into()),
                ("body", format!("Comment {name}").into()),
            ],
        );
    }

    for (id, name) in [(1, "rust"), (2, "orm")] {
        store.insert(
            "tags",
            [("id", Value::from(id)), ("name", name.into()), ("description", "tag".into())],
        );
    }
    for (post_id, tag_id) in [(1, 1), (1, 2), (2, 2)] {
        store.insert("posts_tags", [("post_id", Value::from(post_id)), ("tag_id", Value::from(tag_id))]);
    }

    for (id, name) in [(1, "news"), (2, "tech")] {
        store.insert(
            "categories",
            [("id", Value::from(id)), ("name", name.into()), ("description", "category".into())],
        );
    }
    for (id, post_id, category_id) in [(1, 1, 1), (2, 1, 1), (3, 1, 2), (4, 2, 2)] {
        store.insert(
            "categorizations",
            [
                ("id", Value::from(id)),
                ("post_id", Value::from(post_id)),
                ("category_id", Value::from(category_id)),
            ],
        );
    }

    store.insert(
        "pages",
        [
            ("id", Value::from(1)),
            ("account_id", Value::from(1)),
            ("title", "Home".into()),
            ("content", "Welcome".into()),
        ],
    );
    store
}

pub fn sti_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert("authors", [("id", Value::from(1)), ("name", "Ann".into())]);
    for (id, kind, title) in [(1, "Post", "Plain"), (2, "SpecialPost", "Special")] {
        store.insert(
            "posts",
            [
                ("id", Value::from(id)),
                ("author_id", Value::from(1)),
                ("type", kind.into()),
                ("title", title.into()),
                ("body", "Body".into()),
            ],
        );
    }
    store
}
