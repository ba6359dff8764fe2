//! Read-only coupon category catalog

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String, // slug
    pub name: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    pub display_order: u32,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    categories: Vec<Category>,
}

/// Lower-cased name with whitespace runs collapsed to `-`.
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

impl Category {
    pub fn new(name: &str, description: &str, icon: &str, color: &str, display_order: u32) -> Self {
        Self {
            id: slugify(name),
            name: name.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
            color: color.to_string(),
            display_order,
        }
    }
    fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }
}

impl Catalog {
    pub fn new(mut categories: Vec<Category>) -> Self {
        categories.sort_by_key(|c| c.display_order);
        Self { categories }
    }

    pub fn all(&self) -> &[Category] {
        &self.categories
    }

    pub fn get(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(vec![
            Category::new(
                "Food & Dining",
                "Coupons for restaurants, cafes, and food delivery",
                "🍔",
                "#EF4444",
                1,
            )
            .with_id("food-dining"),
            Category::new(
                "Shopping",
                "Discounts on fashion, electronics, and more",
                "🛍️",
                "#8B5CF6",
                2,
            ),
            Category::new("Travel", "Flight, hotel, and vacation deals", "✈️", "#3B82F6", 3),
            Category::new(
                "Entertainment",
                "Movies, events, and streaming services",
                "🎬",
                "#EC4899",
                4,
            ),
            Category::new(
                "Health & Fitness",
                "Gym memberships, wellness, and healthcare",
                "💪",
                "#10B981",
                5,
            )
            .with_id("health-fitness"),
            Category::new(
                "Beauty & Spa",
                "Salon, spa, and beauty products",
                "💄",
                "#F59E0B",
                6,
            )
            .with_id("beauty-spa"),
            Category::new(
                "Education",
                "Online courses, books, and learning platforms",
                "📚",
                "#6366F1",
                7,
            ),
            Category::new(
                "Electronics",
                "Gadgets, appliances, and tech products",
                "📱",
                "#14B8A6",
                8,
            ),
        ])
    }
}
