#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use oxide_schema::prelude::*;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, 9, 0, 0).unwrap()
}

pub fn id() -> Field {
    Field::new("id", FieldType::Serial).primary_key()
}

/// `users(id serial pk)` and `posts(id serial pk, user_id fk -> users)`.
pub fn users_posts() -> Schema {
    Schema::new("blog")
        .table(
            Table::new("posts")
                .field(id())
                .field(Field::foreign_key("user_id", "users")),
        )
        .table(Table::new("users").field(id()))
}

/// `a(id pk, b_id fk -> b)` and `b(id pk, a_id fk -> a)`.
pub fn cyclic() -> Schema {
    Schema::new("cyclic")
        .table(
            Table::new("a")
                .field(id())
                .field(Field::foreign_key("b_id", "b")),
        )
        .table(
            Table::new("b")
                .field(id())
                .field(Field::foreign_key("a_id", "a")),
        )
}

/// `users(id serial pk, name varchar(length))`.
pub fn users_with_name(length: u32) -> Schema {
    Schema::new("app").table(
        Table::new("users")
            .field(id())
            .field(Field::new("name", FieldType::Varchar).length(length)),
    )
}

/// A schema touching every kind of element.
pub fn store() -> Schema {
    Schema::new("store")
        .version("2.0.0")
        .default_symbol("postgresql", "uuid", "gen_random_uuid()")
        .table(
            Table::new("customers")
                .field(Field::new("id", FieldType::Uuid).primary_key().default_value("uuid"))
                .field(Field::new("email", FieldType::Varchar).length(255).not_null())
                .field(Field::new("created_at", FieldType::Timestamp).auto_create())
                .field(Field::new("updated_at", FieldType::Timestamp).auto_update())
                .index(Index::new("idx_customers_email", vec!["email".to_string()]).unique()),
        )
        .table(
            Table::new("orders")
                .field(id())
                .field(
                    Field::foreign_key("customer_id", "customers")
                        .not_null()
                        .on_delete(OnDelete::Cascade),
                )
                .field(Field::new("total", FieldType::Decimal).precision(10, 2))
                .field(Field::new("notes", FieldType::Text))
                .field(Field::many_to_many("tags", "tags")),
        )
        .table(
            Table::new("tags")
                .field(id())
                .field(Field::new("label", FieldType::Varchar).length(50).not_null()),
        )
        .table(
            Table::new("categories")
                .field(id())
                .field(Field::foreign_key("parent_id", "categories")),
        )
}

pub fn plan_with(
    provider: &dyn Provider,
    options: PlanOptions,
    old: Option<&Schema>,
    new: &Schema,
    handler: &mut dyn DestructiveChangeHandler,
) -> Result<MigrationPlan> {
    let diff = diff_schemas(old, Some(new));
    MigrationPlanner::new(provider)
        .with_options(options)
        .assemble_at(&diff, old, new, handler, fixed_now())
}
